//! Plain-text summary written to `model.results`.

use nf_types::{NfResult, Samples};
use std::fmt::Write;

const REPORT_SIGMA: f64 = 3.0;

pub fn results_text(samples: &Samples) -> NfResult<String> {
    let mut text = String::new();
    let (Some(max_log_likelihood), Some(best)) = (
        samples.max_log_likelihood(),
        samples.max_log_likelihood_instance(),
    ) else {
        text.push_str("No samples recorded yet\n");
        return Ok(text);
    };

    let _ = writeln!(text, "{:<40}{:.8}", "Maximum Log Likelihood", max_log_likelihood);
    if let Some(log_evidence) = samples.log_evidence() {
        let _ = writeln!(text, "{:<40}{:.8}", "Log Evidence", log_evidence);
    }
    let _ = writeln!(text, "{:<40}{}", "Total Samples", samples.total_samples());

    text.push_str("\nMaximum Log Likelihood Model:\n\n");
    for (name, value) in best.iter() {
        let _ = writeln!(text, "{name:<40}{value:.6}");
    }

    let medians = samples.median_pdf_vector()?;
    let bounds = samples.vector_at_sigma(REPORT_SIGMA)?;
    let _ = writeln!(text, "\nMedian PDF Model ({REPORT_SIGMA:.1} sigma limits):\n");
    for ((name, median), (lower, upper)) in samples
        .model()
        .prior_names()
        .into_iter()
        .zip(medians)
        .zip(bounds)
    {
        let _ = writeln!(text, "{name:<40}{median:.6} ({lower:.6}, {upper:.6})");
    }
    Ok(text)
}
