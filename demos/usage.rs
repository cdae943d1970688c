//! Configuration surface tour: presets, the builder, YAML round-tripping,
//! and the one fallible step (`compile`).

use fhir_validator_core::config::{Preset, TerminologyMode, ValidatorConfig};
use fhir_validator_core::context::ReferenceMode;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Presets are fixed, off-the-shelf postures.
    let ingestion_cfg = ValidatorConfig::preset(Preset::Ingestion);
    let plan = ingestion_cfg.compile()?;
    println!("Ingestion plan runs {} phases", plan.phases.len());

    // The builder starts from a preset and overrides from there.
    let custom_cfg = ValidatorConfig::builder()
        .preset(Preset::Server)
        .terminology_mode(TerminologyMode::Local)
        .reference_mode(ReferenceMode::TypeOnly)
        .fail_fast(true)
        .max_issues(500)
        .build();
    let plan = custom_cfg.compile()?;
    println!("Custom plan runs {} phases, max_errors={}", plan.phases.len(), plan.max_errors);

    // Config is plain data, so it serializes to YAML for operators to hand-edit.
    let yaml = r#"
terminology:
  mode: Local
  timeout_ms: 2000
constraints:
  mode: Full
  best_practice: Warn
  suppress:
    - "dom-6"
exec:
  fail_fast: false
  max_issues: 1000
"#;
    let cfg = ValidatorConfig::from_yaml(yaml)?;
    let plan = cfg.compile()?;
    println!("YAML-loaded plan runs {} phases", plan.phases.len());

    // compile() is the one place an invalid combination is rejected.
    let invalid_cfg = ValidatorConfig::builder().reference_mode(ReferenceMode::Full).terminology_mode(TerminologyMode::Off).build();
    match invalid_cfg.compile() {
        Ok(_) => println!("should not happen"),
        Err(e) => println!("caught expected config error: {e}"),
    }

    let cfg = ValidatorConfig::preset(Preset::Publication);
    println!("\nPublication preset as YAML:\n{}", cfg.to_yaml()?);

    Ok(())
}
