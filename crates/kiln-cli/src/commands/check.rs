//! Check command - run the validation pipeline once and report.

use std::path::Path;
use std::sync::{Arc, PoisonError};

use kiln_config::Config;
use kiln_host::{HostError, Pipeline, PipelineEvent, ValidationOutcome, resolve_unit};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config_bridge;
use crate::theme::Theme;

/// Validate the unit at `root`. Returns whether it passed.
pub(crate) async fn run_check(root: &Path, cfg: &Config, as_json: bool) -> anyhow::Result<bool> {
    let descriptor = config_bridge::to_descriptor_config(cfg);
    let unit = match resolve_unit(root, &descriptor) {
        Ok(unit) => unit,
        Err(e) => {
            report_failure(&e, None, as_json);
            return Ok(false);
        },
    };

    if !as_json {
        println!("\n{}", Theme::header(&format!("Checking {}", unit.root().display())));
        if let Some(description) = unit.description() {
            println!("{}", Theme::dimmed(description));
        }
        println!("{}", Theme::separator());
    }

    let pipeline = Arc::new(Pipeline::new(descriptor)?);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let worker = {
        let pipeline = Arc::clone(&pipeline);
        let unit = unit.clone();
        tokio::task::spawn_blocking(move || pipeline.run(&unit, &CancellationToken::new(), &tx))
    };

    let mut reached = 0u8;
    while let Some(event) = rx.recv().await {
        match event {
            PipelineEvent::Progress { percent, message } => {
                reached = percent;
                if !as_json {
                    println!("{}", Theme::progress(percent, &message));
                }
            },
            PipelineEvent::Preflight { ok: true, message } if !as_json => {
                println!("{}", Theme::success(&message));
            },
            PipelineEvent::Preflight { .. } => {},
        }
    }

    let Some(outcome) = worker.await? else {
        anyhow::bail!("validation was cancelled");
    };

    match outcome {
        ValidationOutcome::Success { unit, message, .. } => {
            let module = pipeline
                .registry()
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(unit.identity());
            if as_json {
                let report = json!({
                    "ok": true,
                    "unit": unit.identity().as_str(),
                    "entry_point": unit.entry_point(),
                    "progress": reached,
                    "message": message,
                    "digest": module.as_ref().map(|m| m.digest().to_owned()),
                    "exports": module.as_ref().map(|m| m.exports().to_vec()),
                    "tolerated_imports": module.as_ref().map(|m| m.tolerated_imports().to_vec()),
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", Theme::separator());
                println!(
                    "{}",
                    Theme::success(&format!("{}::{} is valid", unit.identity(), unit.entry_point()))
                );
                if let Some(module) = module {
                    println!("  {} {}", Theme::dimmed("digest "), module.digest());
                    println!("  {} {}", Theme::dimmed("exports"), module.exports().join(", "));
                    for import in module.tolerated_imports() {
                        println!(
                            "{}",
                            Theme::warning(&format!("optional import not found: {import}"))
                        );
                    }
                }
                println!();
            }
            Ok(true)
        },
        ValidationOutcome::Failure { error, .. } => {
            report_failure(&error, Some(reached), as_json);
            Ok(false)
        },
    }
}

fn report_failure(error: &HostError, reached: Option<u8>, as_json: bool) {
    if as_json {
        let diagnostics: Vec<String> = error.diagnostics().iter().map(ToString::to_string).collect();
        let report = json!({
            "ok": false,
            "stage": error.stage().map(kiln_host::Stage::tag),
            "progress": reached,
            "diagnostics": diagnostics,
            "message": error.to_string(),
        });
        println!("{report:#}");
        return;
    }
    println!("{}", Theme::separator());
    if error.diagnostics().is_empty() {
        println!("{}", Theme::error(&error.to_string()));
    }
    for diagnostic in error.diagnostics() {
        println!("{}", Theme::diagnostic(&diagnostic.to_string()));
    }
    println!();
}
