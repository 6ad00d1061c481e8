use crate::stats::ReportStats;

/// Flatten a report into `metric_name,metric_type,value` rows.
pub fn generate_csv(report: &ReportStats) -> String {
    let mut out = String::from("metric_name,metric_type,value\n");

    out.push_str(&format!("http_reqs,counter,{}\n", report.total_requests));
    let failed_rate = if report.total_requests > 0 {
        report.failed_requests as f64 / report.total_requests as f64
    } else {
        0.0
    };
    out.push_str(&format!("http_req_failed,rate,{:.4}\n", failed_rate));
    for (suffix, value) in [
        ("avg", report.avg_latency_ms),
        ("min", report.min_latency_ms),
        ("max", report.max_latency_ms),
        ("p50", report.p50_latency_ms),
        ("p90", report.p90_latency_ms),
        ("p95", report.p95_latency_ms),
        ("p99", report.p99_latency_ms),
    ] {
        out.push_str(&format!("http_req_duration_{},gauge,{:.3}\n", suffix, value));
    }

    let mut codes: Vec<_> = report.status_codes.iter().collect();
    codes.sort_by_key(|a| a.0);
    for (code, count) in codes {
        out.push_str(&format!("http_req_status_{},counter,{}\n", code, count));
    }

    out.push_str(&format!("iterations,counter,{}\n", report.iterations.completed));
    out.push_str(&format!(
        "aborted_iterations,counter,{}\n",
        report.iterations.aborted
    ));
    out.push_str(&format!(
        "dropped_iterations,counter,{}\n",
        report.iterations.dropped
    ));
    out.push_str(&format!(
        "iteration_duration_avg,gauge,{:.3}\n",
        report.iterations.avg_duration_ms
    ));

    // Checks (tuple: passed, failed)
    let mut checks: Vec<_> = report.checks.iter().collect();
    checks.sort_by_key(|a| a.0);
    for (name, (passed, failed)) in checks {
        let safe_name = name.replace([' ', ':', ','], "_");
        out.push_str(&format!("check_{}_passed,counter,{}\n", safe_name, passed));
        out.push_str(&format!("check_{}_failed,counter,{}\n", safe_name, failed));
    }

    let mut scenarios: Vec<_> = report.scenarios.iter().collect();
    scenarios.sort_by_key(|a| a.0);
    for (name, s) in scenarios {
        out.push_str(&format!(
            "scenario_{}_peak_workers,gauge,{}\n",
            name, s.peak_workers
        ));
    }

    out
}
