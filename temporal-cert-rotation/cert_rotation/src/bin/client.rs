//! Starts a `GreetSomeone` workflow over the same certificate-authenticated
//! connection the worker uses and prints its result.

use helpers::{Settings, init_logger, parse_workflow_result};
use log::info;
use serde_json::json;
use temporal_client::{WfClientExt, WorkflowClientTrait, WorkflowOptions};
use temporal_sdk_core_protos::coresdk::AsJsonPayloadExt;
use uuid::Uuid;

use cert_rotation::workflow::WORKFLOW_TYPE;
use cert_rotation::{LOG_TARGET, bootstrap};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    // The name to greet can be provided as CLI arg; default to "World".
    let name = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "World".to_string());

    let settings = Settings::from_env()?;
    let connection = bootstrap::connect(&settings).await?;
    let client = connection.client();

    info!(target: LOG_TARGET, "Starting {WORKFLOW_TYPE} workflow for name={name}");

    let input = vec![json!(name).as_json_payload()?];
    let workflow_id = format!("greeting-{}", Uuid::new_v4());

    let start_res = client
        .start_workflow(
            input,
            settings.task_queue.clone(),
            workflow_id.clone(),
            WORKFLOW_TYPE.to_string(),
            None,
            WorkflowOptions::default(),
        )
        .await?;

    let handle = client.get_untyped_workflow_handle(workflow_id, start_res.run_id);
    let res_payloads = handle
        .get_workflow_result(Default::default())
        .await?
        .unwrap_success();

    let greeting: String = parse_workflow_result(&res_payloads)?;
    println!("Workflow completed with result: {greeting}");

    connection.close();
    Ok(())
}
