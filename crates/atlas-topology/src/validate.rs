//! Referential validation shared by the ledger and the route table

use atlas_core::{Error, Result, ServiceRecord};
use atlas_state::ServiceRegistry;

/// Look up `id`, failing with `err` if it is not registered.
///
/// `role` names the reference in the message, e.g. `"source"`.
pub fn require_service<E>(
    registry: &ServiceRegistry,
    id: &str,
    role: &str,
    err: E,
) -> Result<ServiceRecord>
where
    E: FnOnce(String) -> Error,
{
    if id.trim().is_empty() {
        return Err(err(format!("{role} service id cannot be empty")));
    }
    registry
        .get(id)
        .ok_or_else(|| err(format!("{role} service '{id}' does not exist")))
}

/// Like [`require_service`], additionally requiring `is_gateway`
pub fn require_gateway<E>(registry: &ServiceRegistry, id: &str, err: E) -> Result<ServiceRecord>
where
    E: Fn(String) -> Error,
{
    let record = require_service(registry, id, "gateway", &err)?;
    if !record.is_gateway() {
        return Err(err(format!("service '{id}' is not a gateway")));
    }
    Ok(record)
}
