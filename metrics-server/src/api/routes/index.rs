//! HTML listing of every stored metric.

use std::fmt::Write;

use axum::{Router, extract::State, response::Html, routing::get};

use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::storage::{CounterItem, GaugeItem};

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(index))
}

async fn index(State(state): State<AppState>) -> ApiResult<Html<String>> {
    let gauges = state.store.list_gauges().await?;
    let counters = state.store.list_counters().await?;
    Ok(Html(render(&gauges, &counters)))
}

fn render(gauges: &[GaugeItem], counters: &[CounterItem]) -> String {
    let mut page = String::from(
        "<!DOCTYPE html>\n<html lang=\"en\">\n  <head>\n    <meta charset=\"utf-8\">\n    \
         <title>Metrics list</title>\n  </head>\n  <body>\n    <ul>\n",
    );
    for gauge in gauges {
        let _ = writeln!(
            page,
            "      <li>gauge {} {}</li>",
            escape(&gauge.name),
            gauge.value
        );
    }
    for counter in counters {
        let _ = writeln!(
            page,
            "      <li>counter {} {}</li>",
            escape(&counter.name),
            counter.value
        );
    }
    page.push_str("    </ul>\n  </body>\n</html>\n");
    page
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
