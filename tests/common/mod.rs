//! Shared helpers for protocol tests: a wiremock coordinator and envelope
//! builders.

use std::sync::Arc;

use serde_json::{json, Value as Json};
use wiremock::MockServer;

use trino_rs::{Connection, ConnectionParams, NoAuthentication};

/// Connection parameters pointing at a mock coordinator.
pub fn params_for(server: &MockServer) -> ConnectionParams {
    let address = server.address();
    ConnectionParams::new(address.ip().to_string())
        .with_port(address.port())
        .with_user("test")
}

/// Anonymous connection to a mock coordinator.
pub fn connect(server: &MockServer) -> Connection {
    Connection::connect(params_for(server), Arc::new(NoAuthentication)).unwrap()
}

/// Column metadata for a single integer column named `_col0`.
pub fn integer_column() -> Json {
    json!([{
        "name": "_col0",
        "type": "integer",
        "typeSignature": {"rawType": "integer", "arguments": []}
    }])
}

/// A terminal envelope carrying rows.
pub fn final_page(id: &str, columns: Json, data: Json) -> Json {
    json!({
        "id": id,
        "infoUri": format!("http://coordinator/ui/{id}"),
        "columns": columns,
        "data": data,
        "stats": {"state": "FINISHED"}
    })
}

/// A non-terminal envelope pointing at `next_uri`.
pub fn running_page(id: &str, next_uri: &str, columns: Option<Json>, data: Option<Json>) -> Json {
    let mut page = json!({
        "id": id,
        "infoUri": format!("http://coordinator/ui/{id}"),
        "nextUri": next_uri,
        "stats": {"state": "RUNNING"}
    });
    if let Some(columns) = columns {
        page["columns"] = columns;
    }
    if let Some(data) = data {
        page["data"] = data;
    }
    page
}
