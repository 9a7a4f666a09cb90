use std::io::Write;

use tauscan::{lint, load, RuleKind, RuleLevel, RuleStatus};

fn write_rule(text: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file
}

#[test]
fn loads_a_chainsaw_rule() {
    let file = write_rule(
        "title: suspicious powershell encoded command\nauthors:\n  - tester\nkind: json\nlevel: high\nstatus: stable\ntimestamp: Timestamp\nfilter: \"CommandLine: i*-enc*\"\n",
    );
    let rules = load(RuleKind::Chainsaw, file.path(), &None, &None, &None).unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].name(), "suspicious powershell encoded command");
    assert_eq!(rules[0].level(), &RuleLevel::High);
    assert_eq!(rules[0].status(), &RuleStatus::Stable);
    assert_eq!(rules[0].authors(), &["tester".to_string()]);
}

#[test]
fn loads_a_sigma_rule_collection() {
    let file = write_rule(
        "title: Suspicious PowerShell\ndescription: test\nlevel: high\nauthor: dev\ndetection:\n  selection:\n    CommandLine|contains: ' -enc '\n  condition: selection\n",
    );
    let rules = load(RuleKind::Sigma, file.path(), &None, &None, &None).unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].name(), "Suspicious PowerShell");
    assert_eq!(rules[0].level(), &RuleLevel::High);
    assert_eq!(rules[0].authors(), &["dev".to_string()]);
}

#[test]
fn level_filter_excludes_out_of_scope_rules() {
    let file = write_rule(
        "title: t\ndescription: d\nlevel: low\ndetection:\n  selection:\n    EventID: 1\n  condition: selection\n",
    );
    let levels = Some([RuleLevel::Critical, RuleLevel::High].into_iter().collect());
    let rules = load(RuleKind::Sigma, file.path(), &None, &levels, &None).unwrap();
    assert!(rules.is_empty());
}

#[test]
fn lint_returns_one_detection_per_sigma_document() {
    let file = write_rule(
        "title: base\ndescription: d\naction: global\ndetection:\n  A:\n    X: 1\n  condition: A\n---\ndetection:\n  B:\n    Y: 2\n  condition: A and B\n",
    );
    let detections = lint(&RuleKind::Sigma, file.path()).unwrap();
    assert_eq!(detections.len(), 1);
}

#[test]
fn non_yaml_extension_is_rejected() {
    let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
    file.write_all(b"title: t\n").unwrap();
    assert!(load(RuleKind::Chainsaw, file.path(), &None, &None, &None).is_err());
}
