//! Prometheus metrics HTTP endpoint
//!
//! Exposes allocator metrics in Prometheus text format at /metrics, a JSON
//! occupancy listing at /occupancy and a liveness probe at /health.
//! Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use crate::services::occupancy::{FacilityOccupancy, OccupancyQuery};
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    sum: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {cumulative}");
}

/// Escape a label value per the text exposition format
fn escape_label(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(
    metrics: &Metrics,
    occupancy: &[FacilityOccupancy],
    active_reservations: usize,
    site_id: &str,
) -> String {
    let occupied: u64 = occupancy.iter().map(FacilityOccupancy::occupied_places).sum();
    let summary = metrics.report(active_reservations, occupied);
    let mut output = String::with_capacity(8192);

    write_reservation_metrics(&mut output, site_id, &summary);
    write_allocation_metrics(&mut output, site_id, &summary);
    write_sweep_metrics(&mut output, site_id, &summary);
    write_sector_gauges(&mut output, site_id, occupancy);

    output
}

fn write_reservation_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "parking_reservations_created_total",
        "Reservations created",
        MetricType::Counter,
        site,
        summary.reservations_created,
    );
    write_metric(
        output,
        "parking_reservations_ended_total",
        "Reservations ended by client exit",
        MetricType::Counter,
        site,
        summary.reservations_ended,
    );
    write_metric(
        output,
        "parking_reservations_cancelled_total",
        "Reservations cancelled",
        MetricType::Counter,
        site,
        summary.reservations_cancelled,
    );
    write_metric(
        output,
        "parking_reservations_expired_total",
        "Reservations force-ended by the expiry sweep",
        MetricType::Counter,
        site,
        summary.reservations_expired,
    );
    write_metric(
        output,
        "parking_entries_total",
        "Parking entries recorded",
        MetricType::Counter,
        site,
        summary.entries_total,
    );
    write_metric(
        output,
        "parking_active_reservations",
        "Currently active reservations",
        MetricType::Gauge,
        site,
        summary.active_reservations as u64,
    );
    write_metric(
        output,
        "parking_notices_dropped_total",
        "Lifecycle notices dropped due to full channel",
        MetricType::Counter,
        site,
        summary.notices_dropped,
    );
}

fn write_allocation_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_histogram(
        output,
        "parking_allocation_latency_us",
        "Reservation allocation latency in microseconds",
        site,
        &summary.allocation_lat_buckets,
        &METRICS_BUCKET_BOUNDS,
        summary.allocation_lat_sum_us,
    );
    write_metric(
        output,
        "parking_allocation_latency_p99_us",
        "99th percentile allocation latency",
        MetricType::Gauge,
        site,
        summary.allocation_lat_p99_us,
    );
    write_metric(
        output,
        "parking_allocation_conflicts_total",
        "Allocation attempts lost to a concurrent writer",
        MetricType::Counter,
        site,
        summary.allocation_conflicts,
    );
    write_metric(
        output,
        "parking_commit_retries_total",
        "Version-checked writes retried after a conflict",
        MetricType::Counter,
        site,
        summary.commit_retries,
    );
    write_metric(
        output,
        "parking_no_available_place_total",
        "Requests rejected for lack of an eligible sector",
        MetricType::Counter,
        site,
        summary.no_place_total,
    );
    write_metric(
        output,
        "parking_compensations_total",
        "Capacity increments rolled back after a failed insert",
        MetricType::Counter,
        site,
        summary.compensations_total,
    );
}

fn write_sweep_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "parking_sweep_runs_total",
        "Completed expiry sweeps",
        MetricType::Counter,
        site,
        summary.sweep_runs,
    );
    write_metric(
        output,
        "parking_sweep_failures_total",
        "Reservations an expiry sweep could not end",
        MetricType::Counter,
        site,
        summary.sweep_failures,
    );
    write_metric(
        output,
        "parking_sweep_last_duration_us",
        "Duration of the most recent sweep",
        MetricType::Gauge,
        site,
        summary.last_sweep_duration_us,
    );
}

/// Per-sector capacity gauges
fn write_sector_gauges(output: &mut String, site: &str, occupancy: &[FacilityOccupancy]) {
    let gauges: [(&str, &str); 3] = [
        ("parking_sector_occupied_places", "Occupied places per sector"),
        ("parking_sector_max_places", "Capacity per sector"),
        ("parking_sector_active", "Whether the sector takes part in allocation"),
    ];

    for (i, (name, help)) in gauges.iter().enumerate() {
        let _ = writeln!(output, "# HELP {name} {help}");
        let _ = writeln!(output, "# TYPE {name} gauge");
        for facility in occupancy {
            let facility_id = facility.facility.id();
            for sector in &facility.sectors {
                let val = match i {
                    0 => u64::from(sector.occupied_places),
                    1 => u64::from(sector.max_places),
                    _ => u64::from(sector.active),
                };
                let _ = writeln!(
                    output,
                    "{name}{{site=\"{site}\",facility=\"{facility_id}\",sector=\"{}\",type=\"{}\"}} {val}",
                    escape_label(&sector.name),
                    sector.sector_type.as_str(),
                );
            }
        }
    }
}

fn response(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(body.into()));
    *resp.status_mut() = status;
    resp.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    resp
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    occupancy: Arc<OccupancyQuery>,
    site_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let listing = occupancy.all_occupancy(false);
            let body = format_prometheus_metrics(
                &metrics,
                &listing,
                occupancy.active_reservations(),
                &site_id,
            );
            Ok(response(StatusCode::OK, "text/plain; version=0.0.4; charset=utf-8", body))
        }
        (&Method::GET, "/occupancy") => match serde_json::to_vec(&occupancy.all_occupancy(true)) {
            Ok(body) => Ok(response(StatusCode::OK, "application/json", body)),
            Err(e) => {
                error!(error = %e, "occupancy_encode_failed");
                Ok(response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "application/json",
                    r#"{"ok":false,"error":"encode_failed"}"#,
                ))
            }
        },
        (&Method::GET, "/health") => Ok(response(StatusCode::OK, "text/plain", "ok")),
        _ => Ok(response(StatusCode::NOT_FOUND, "text/plain", "Not Found")),
    }
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    occupancy: Arc<OccupancyQuery>,
    site_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let site_id = Arc::new(site_id);

    info!(port = %port, site = %site_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let occupancy = occupancy.clone();
                        let site_id = site_id.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let occupancy = occupancy.clone();
                                let site_id = site_id.clone();
                                async move { handle_request(req, metrics, occupancy, site_id).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
