// Copyright 2024 The rbldns developers.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Prometheus metrics: query, response, and error counters per zone,
//! plus an optional HTTP exporter serving `/metrics`.

use std::sync::Arc;

use lazy_static::lazy_static;
use log::{debug, error, info, warn};
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};

use crate::thread::{self, ThreadGroup};

lazy_static! {
    /// DNS queries received, by zone and query type.
    pub static ref QUERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "rbldns_queries_total",
        "Total number of DNS queries received",
        &["zone", "qtype"]
    )
    .unwrap();

    /// DNS responses produced, by zone and whether a match was found.
    pub static ref RESPONSES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "rbldns_responses_total",
        "Total number of DNS responses produced",
        &["zone", "found"]
    )
    .unwrap();

    /// Errors, by zone and error type (parse_error, acl_denied,
    /// write_error, ...).
    pub static ref ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "rbldns_errors_total",
        "Total number of errors",
        &["zone", "type"]
    )
    .unwrap();

    /// Query processing duration in seconds.
    pub static ref QUERY_DURATION: HistogramVec = register_histogram_vec!(
        "rbldns_query_duration_seconds",
        "DNS query processing duration in seconds",
        &["zone"],
        vec![0.000_05, 0.000_1, 0.000_5, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]
    )
    .unwrap();
}

/// Records a received query.
pub fn record_query(zone: &str, qtype: u16) {
    QUERIES_TOTAL
        .with_label_values(&[zone, &qtype.to_string()])
        .inc();
}

/// Records a produced response and whether it carried a match.
pub fn record_response(zone: &str, found: bool) {
    let found = if found { "true" } else { "false" };
    RESPONSES_TOTAL.with_label_values(&[zone, found]).inc();
}

/// Records an error of the given type.
pub fn record_error(zone: &str, error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[zone, error_type]).inc();
}

/// Records how long handling one message took.
pub fn observe_duration(zone: &str, seconds: f64) {
    QUERY_DURATION.with_label_values(&[zone]).observe(seconds);
}

////////////////////////////////////////////////////////////////////////
// THE HTTP EXPORTER                                                  //
////////////////////////////////////////////////////////////////////////

/// An HTTP endpoint serving the process metrics in Prometheus text
/// format.
pub struct Exporter {
    server: Arc<tiny_http::Server>,
}

impl Exporter {
    /// Binds `endpoint` (`host:port`) and starts serving `/metrics` on
    /// a thread of `group`.
    pub fn start(endpoint: &str, group: &Arc<ThreadGroup>) -> Result<Self, Error> {
        let server = Arc::new(tiny_http::Server::http(endpoint).map_err(Error::Bind)?);
        let thread_server = server.clone();
        let thread_group = group.clone();
        group
            .spawn("metrics exporter", move || {
                serve(&thread_server, &thread_group);
            })
            .map_err(Error::Thread)?;
        info!("metrics exporter listening on http://{}/metrics", endpoint);
        Ok(Self { server })
    }

    /// Unblocks the exporter thread so it can observe group shutdown.
    pub fn shut_down(&self) {
        self.server.unblock();
    }
}

fn serve(server: &tiny_http::Server, group: &ThreadGroup) {
    loop {
        let request = match server.recv() {
            Ok(request) => request,
            Err(_) => {
                // recv is unblocked during shutdown.
                if group.is_shutting_down() {
                    return;
                }
                continue;
            }
        };
        if group.is_shutting_down() {
            return;
        }

        if request.url() != "/metrics" {
            let _ = request.respond(tiny_http::Response::empty(404));
            continue;
        }

        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(err) = encoder.encode(&prometheus::gather(), &mut buffer) {
            error!("failed to encode metrics: {}", err);
            let _ = request.respond(tiny_http::Response::empty(500));
            continue;
        }

        let mut response = tiny_http::Response::from_data(buffer);
        if let Ok(header) = tiny_http::Header::from_bytes(
            &b"Content-Type"[..],
            &b"text/plain; version=0.0.4"[..],
        ) {
            response.add_header(header);
        }
        if let Err(err) = request.respond(response) {
            debug!("failed to send metrics response: {}", err);
        }
    }
}

/// An error starting the exporter. The server runs without metrics
/// export when this happens.
#[derive(Debug)]
pub enum Error {
    Bind(Box<dyn std::error::Error + Send + Sync>),
    Thread(thread::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Bind(err) => write!(f, "failed to bind metrics endpoint: {}", err),
            Self::Thread(err) => write!(f, "failed to start exporter thread: {}", err),
        }
    }
}

impl std::error::Error for Error {}

/// Logs the OTLP endpoint situation: accepted in the configuration for
/// compatibility, but no OTLP exporter is compiled into this build.
pub fn note_otel_endpoint(endpoint: &str) {
    warn!(
        "otel_endpoint {} configured, but OTLP export is not compiled in; \
         use the Prometheus endpoint instead",
        endpoint,
    );
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_by_label() {
        let before = QUERIES_TOTAL.with_label_values(&["test.zone.", "1"]).get();
        record_query("test.zone.", 1);
        record_query("test.zone.", 1);
        let after = QUERIES_TOTAL.with_label_values(&["test.zone.", "1"]).get();
        assert_eq!(after - before, 2);

        let denied_before = ERRORS_TOTAL
            .with_label_values(&["test.zone.", "acl_denied"])
            .get();
        record_error("test.zone.", "acl_denied");
        let denied_after = ERRORS_TOTAL
            .with_label_values(&["test.zone.", "acl_denied"])
            .get();
        assert_eq!(denied_after - denied_before, 1);
    }
}
