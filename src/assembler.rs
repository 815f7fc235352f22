//! Cypher Assembler (spec §4.6), grounded on `proto_files.go::Cyphers` (the
//! per-package string collection in dependency order) and
//! `compiler.go::WriteString` (the transactional envelope, carried over
//! byte-for-byte as the wrapper format).

use tracing::{debug, instrument};

use crate::model::CompilationOutput;

const ENVELOPE_HEADER: &str = "BEGIN\nMERGE\n";
const ENVELOPE_FOOTER: &str = "COMMIT\nEXCEPTION\n\tWHEN ANY THEN ROLLBACK;\n";

/// Wraps one package's seven fragments into the transactional envelope the
/// executor expects.
pub fn wrap(output: &CompilationOutput) -> String {
    let mut cy = String::from(ENVELOPE_HEADER);
    for fragment in output.fragments() {
        cy.push_str(fragment);
    }
    cy.push_str(ENVELOPE_FOOTER);
    cy
}

/// Produces one wrapped Cypher statement per package, in the order the
/// topological orderer already established — least-specific (no
/// dependents) to most-specific, so relationship targets always already
/// exist by the time a later statement references them.
#[instrument(skip(outputs), fields(packages = outputs.len()))]
pub fn cyphers(outputs: &[CompilationOutput]) -> Vec<String> {
    let statements: Vec<String> = outputs.iter().map(|o| wrap(o).trim().to_string()).collect();
    debug!(statements = statements.len(), "assembled Cypher statements");
    statements
}

/// Joins every package's wrapped statement into a single batch, in order.
#[instrument(skip(outputs), fields(packages = outputs.len()))]
pub fn combined(outputs: &[CompilationOutput]) -> String {
    let batch = cyphers(outputs).join("\n");
    debug!(bytes = batch.len(), "assembled combined batch");
    batch
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_fragments_in_transactional_envelope() {
        let output = CompilationOutput {
            metadata: "(demo:Package {}),\n".to_string(),
            ..Default::default()
        };
        let wrapped = wrap(&output);
        assert!(wrapped.starts_with("BEGIN\nMERGE\n"));
        assert!(wrapped.ends_with("EXCEPTION\n\tWHEN ANY THEN ROLLBACK;\n"));
        assert!(wrapped.contains("(demo:Package {}),"));
    }

    #[test]
    fn combined_preserves_package_order() {
        let first = CompilationOutput {
            metadata: "first\n".to_string(),
            ..Default::default()
        };
        let second = CompilationOutput {
            metadata: "second\n".to_string(),
            ..Default::default()
        };
        let batch = combined(&[first, second]);
        assert!(batch.find("first").unwrap() < batch.find("second").unwrap());
    }
}
