//! Displayable cache status and the HTTP debug surface.

use std::sync::Arc;

use serde::Serialize;
use warp::Filter;

use crate::healthcheck::HealthCheck;
use crate::healthcheck::TabletStatus;
use crate::topo::Target;

/// HTML code to display a tablet cache status list for human viewing. The
/// actual rendering lives with the embedding server's template engine.
pub const HEALTH_CHECK_TEMPLATE: &str = r#"
<style>
  table {
    border-collapse: collapse;
  }
  td, th {
    border: 1px solid #999;
    padding: 0.2rem;
  }
</style>
<table>
  <tr>
    <th colspan="5">HealthCheck Tablet Cache</th>
  </tr>
  <tr>
    <th>Cell</th>
    <th>Keyspace</th>
    <th>Shard</th>
    <th>TabletType</th>
    <th>TabletHealth</th>
  </tr>
  {{#each status}}
  <tr>
    <td>{{this.cell}}</td>
    <td>{{this.target.keyspace}}</td>
    <td>{{this.target.shard}}</td>
    <td>{{this.target.tablet_type}}</td>
    <td>{{this.tablet_stats}}</td>
  </tr>
  {{/each}}
</table>
"#;

/// Health of every tablet the cache tracks for one `(cell, target)` pair,
/// with tablets sorted by alias for stable serialization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TabletsCacheStatus {
    pub cell: String,
    pub target: Target,
    pub tablet_stats: Vec<TabletStatus>,
}

/// Escapes `<`, `>`, `&`, U+2028 and U+2029 inside serialized JSON so the
/// payload is safe to embed in HTML contexts.
pub fn html_escape_json(json: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(json.len());
    let mut i = 0;
    while i < json.len() {
        match json[i] {
            b'<' => out.extend_from_slice(b"\\u003c"),
            b'>' => out.extend_from_slice(b"\\u003e"),
            b'&' => out.extend_from_slice(b"\\u0026"),
            0xE2 if json.len() > i + 2 && json[i + 1] == 0x80 && (json[i + 2] == 0xA8 || json[i + 2] == 0xA9) => {
                if json[i + 2] == 0xA8 {
                    out.extend_from_slice(b"\\u2028");
                } else {
                    out.extend_from_slice(b"\\u2029");
                }
                i += 2;
            }
            b => out.push(b),
        }
        i += 1;
    }
    out
}

/// `GET /debug/gateway`: the current state of the tablet cache as
/// HTML-escaped JSON.
pub fn debug_gateway_route(
    hc: Arc<HealthCheck>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    warp::path!("debug" / "gateway").and(warp::get()).map(move || {
        let status = hc.cache_status();
        let body = match serde_json::to_vec_pretty(&status) {
            Ok(body) => html_escape_json(&body),
            Err(e) => e.to_string().into_bytes(),
        };
        let body = String::from_utf8(body).unwrap_or_default();
        warp::reply::with_header(body, "content-type", "application/json; charset=utf-8")
    })
}
