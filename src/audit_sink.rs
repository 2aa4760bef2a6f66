//! CLI `AuditSink`: pretty-prints each `AuditLog` append to stderr when
//! `--verbose` is set. Optional forwarding hook per DESIGN.md Open
//! Question 1 — `AuditLog` itself is the mandatory JSONL persistence;
//! this is purely an extra terminal echo.

use forge_common::AuditSink;

pub struct VerboseAuditSink;

impl AuditSink for VerboseAuditSink {
    fn on_audit_event(&self, line: &str) {
        eprintln!("[audit] {line}");
    }
}
