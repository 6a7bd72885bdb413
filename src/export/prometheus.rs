//! Prometheus text exposition of a store snapshot.

use std::fmt::Write;

use crate::state::{HopStat, Snapshot};

/// Content type for the text exposition format
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

const NAMESPACE: &str = "mtr";

const BUILD_INFO_HELP: &str =
    "A metric with a constant '1' value labeled by the exporter version.";

/// Renders per-hop gauges from a [`Snapshot`]
///
/// Stateless apart from the build version; every call renders from scratch.
#[derive(Debug, Clone)]
pub struct SnapshotExporter {
    version: String,
}

impl SnapshotExporter {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }

    pub fn render(&self, snapshot: &Snapshot) -> String {
        let mut out = String::new();

        self.render_family(&mut out, snapshot, "sent", "packets sent", |hop| hop.sent);
        self.render_family(&mut out, snapshot, "received", "packets received", |hop| {
            hop.received
        });

        let _ = writeln!(out, "# HELP {NAMESPACE}_exporter_build_info {BUILD_INFO_HELP}");
        let _ = writeln!(out, "# TYPE {NAMESPACE}_exporter_build_info gauge");
        let _ = writeln!(
            out,
            "{NAMESPACE}_exporter_build_info{{version=\"{}\"}} 1",
            escape_label(&self.version)
        );

        out
    }

    fn render_family(
        &self,
        out: &mut String,
        snapshot: &Snapshot,
        name: &str,
        help: &str,
        value: impl Fn(&HopStat) -> u64,
    ) {
        let _ = writeln!(out, "# HELP {NAMESPACE}_{name} {help}");
        let _ = writeln!(out, "# TYPE {NAMESPACE}_{name} gauge");
        for (alias, hop) in snapshot.iter() {
            let _ = writeln!(
                out,
                "{NAMESPACE}_{name}{{alias=\"{}\",hop=\"{}\"}} {}",
                escape_label(alias),
                hop.index,
                value(hop)
            );
        }
    }
}

fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
