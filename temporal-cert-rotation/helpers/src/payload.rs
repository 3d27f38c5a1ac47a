use anyhow::anyhow;
use serde::de::DeserializeOwned;
use temporal_sdk_core_protos::coresdk::FromJsonPayloadExt;
use temporal_sdk_core_protos::temporal::api::common::v1::Payload;

/// Decode the first payload of a completed workflow's result.
///
/// Workflows in this workspace return exactly one JSON value, so anything
/// beyond the first payload is ignored.
pub fn parse_workflow_result<T>(payloads: &[Payload]) -> anyhow::Result<T>
where
    T: DeserializeOwned,
{
    let first = payloads
        .first()
        .ok_or_else(|| anyhow!("missing result payload"))?;

    Ok(T::from_json_payload(first)?)
}
