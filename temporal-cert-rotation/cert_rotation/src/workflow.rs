//! The greeting workflow served by the worker.

use anyhow::anyhow;
use log::info;
use temporal_sdk::{WfContext, WfExitValue, WorkflowResult};
use temporal_sdk_core_protos::coresdk::FromJsonPayloadExt;

use crate::LOG_TARGET;

/// Workflow type name clients start.
pub const WORKFLOW_TYPE: &str = "GreetSomeone";

pub fn greeting(name: &str) -> String {
    format!("Hello {name}!")
}

/// Greets the name passed as the single workflow argument.
pub async fn greet_someone(ctx: WfContext) -> WorkflowResult<String> {
    let name_payload = ctx
        .get_args()
        .first()
        .ok_or_else(|| anyhow!("missing workflow argument"))?;
    let name = String::from_json_payload(name_payload)?;

    info!(target: LOG_TARGET, "GreetSomeone workflow started. name={name}");

    Ok(WfExitValue::Normal(greeting(&name)))
}
