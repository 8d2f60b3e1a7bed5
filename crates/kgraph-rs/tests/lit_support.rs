use std::fs;
use std::path::PathBuf;

use kgraph_rs::graph::text::parse_graph;
use kgraph_rs::kernel::RegistryKernelInfoSetter;
use kgraph_rs::optimizer::PipelineConfig;
use kgraph_rs::pipeline::schedule_graph;
use kgraph_rs_backend_sim::{replay_graph, SimDevice};

pub struct Case {
    pub name: String,
    pub meta: String,
    pub input: String,
    pub expected: String,
}

/// Fixture format:
/// META:
/// <key: value lines>
/// EXPECTED:
/// <text graph>
/// INPUT:
/// <text graph>
/// run_test
/// (repeat)
pub fn load_cases(fixture_rel: &str) -> Vec<Case> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(fixture_rel);
    let contents =
        fs::read_to_string(&path).unwrap_or_else(|e| panic!("cannot read {:?}: {}", path, e));
    let mut cases = Vec::new();
    let mut meta = String::new();
    let mut expected = String::new();
    let mut input = String::new();
    let mut section = Section::None;
    let mut counter = 0;
    for line in contents.lines() {
        match line.trim_end() {
            "META:" => {
                section = Section::Meta;
                meta.clear();
            }
            "EXPECTED:" => {
                section = Section::Expected;
                expected.clear();
            }
            "INPUT:" => {
                section = Section::Input;
                input.clear();
            }
            "run_test" => {
                counter += 1;
                cases.push(Case {
                    name: format!("case_{counter}"),
                    meta: meta.clone(),
                    input: input.clone(),
                    expected: expected.clone(),
                });
                meta.clear();
                section = Section::None;
            }
            other => {
                let target = match section {
                    Section::Meta => &mut meta,
                    Section::Expected => &mut expected,
                    Section::Input => &mut input,
                    Section::None => continue,
                };
                target.push_str(other);
                target.push('\n');
            }
        }
    }
    cases
}

enum Section {
    None,
    Meta,
    Expected,
    Input,
}

#[derive(Default)]
struct CaseMeta {
    collective_op: Option<String>,
    warnings: usize,
}

impl CaseMeta {
    fn parse(meta: &str) -> Self {
        let mut parsed = CaseMeta::default();
        for line in meta.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(rest) = line.strip_prefix("collective_op:") {
                parsed.collective_op = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("warnings:") {
                parsed.warnings = rest.trim().parse().expect("warning count");
            } else {
                panic!("unsupported META line `{line}`");
            }
        }
        parsed
    }
}

/// Schedules the case input on a fresh [`SimDevice`] and compares the text dump.
pub fn run_case(case: &Case) {
    let meta = CaseMeta::parse(&case.meta);
    let mut graph = parse_graph(&case.input)
        .unwrap_or_else(|e| panic!("{}: cannot parse input: {e}", case.name));

    let mut cfg = PipelineConfig::default();
    if let Some(op) = meta.collective_op {
        cfg.stream_assign.collective_op = op;
    }
    let device = SimDevice::new();
    let kernel_info = RegistryKernelInfoSetter::default();
    let outcome = schedule_graph(&mut graph, &device, &kernel_info, cfg)
        .unwrap_or_else(|e| panic!("{}: scheduling failed: {e:#}", case.name));

    assert_eq!(
        outcome.warnings.len(),
        meta.warnings,
        "warning count mismatch for {}: {:?}",
        case.name,
        outcome.warnings
    );
    let replay = replay_graph(&graph).expect("launch plan export");
    assert!(
        replay.is_clean(),
        "replay hazards for {}: {:?}",
        case.name,
        replay.hazards
    );
    assert_eq!(
        graph.to_text().trim(),
        case.expected.trim(),
        "output mismatch for {}",
        case.name
    );
}
