//! 📊 report.rs: what every worker and saver had to say for itself on the way out.
//!
//! The supervisor joins every task at shutdown and writes down how each one ended.
//! Nobody gets retried. Nobody gets a second chance. They get a row in a table.
//!
//! ```text
//!  pool     worker  status    records  flushes  messages  reason
//!  extract       0  finished   10,000        3     4,102
//!  save          1  failed          0        0         0  store refused partition 'p'
//! ```
//!
//! Each failure is logged once, by the pool, the moment it is joined. The report only
//! carries it into the table.

use std::fmt;

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use tracing::{info, warn};

/// 🏷️ Which side of the pipeline a worker belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    /// 🔬 iqueue → extract → aggregate → oqueue
    Extract,
    /// 🗄️ oqueue → store
    Save,
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolKind::Extract => f.write_str("extract"),
            PoolKind::Save => f.write_str("save"),
        }
    }
}

/// 🔢 Counters a worker hands back when it exits cleanly.
///
/// For an extract worker `records` are raw records consumed, `flushes` are threshold
/// flushes and `messages` are store messages pushed downstream. For a saver `records`
/// is messages persisted and the other two stay at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub records: u64,
    pub flushes: u64,
    pub messages: u64,
}

impl std::ops::AddAssign for WorkerSummary {
    fn add_assign(&mut self, other: Self) {
        self.records += other.records;
        self.flushes += other.flushes;
        self.messages += other.messages;
    }
}

/// 🚦 How a worker left the building.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerStatus {
    Finished,
    /// 💀 Returned an error. The error chain, flattened.
    Failed(String),
    /// 💥 Panicked, or was cancelled out from under us.
    Panicked(String),
}

impl WorkerStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, WorkerStatus::Finished)
    }

    /// 💬 Why it didn't finish, if it didn't.
    pub fn reason(&self) -> Option<&str> {
        match self {
            WorkerStatus::Finished => None,
            WorkerStatus::Failed(reason) | WorkerStatus::Panicked(reason) => Some(reason),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            WorkerStatus::Finished => "finished",
            WorkerStatus::Failed(_) => "failed",
            WorkerStatus::Panicked(_) => "panicked",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub pool: PoolKind,
    pub id: usize,
    pub status: WorkerStatus,
    pub summary: WorkerSummary,
}

/// 📋 Every worker of every pool, in the order they were joined.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    workers: Vec<WorkerReport>,
}

impl ShutdownReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, reports: impl IntoIterator<Item = WorkerReport>) {
        self.workers.extend(reports);
    }

    pub fn workers(&self) -> &[WorkerReport] {
        &self.workers
    }

    pub fn pool(&self, kind: PoolKind) -> impl Iterator<Item = &WorkerReport> {
        self.workers.iter().filter(move |w| w.pool == kind)
    }

    pub fn failures(&self) -> impl Iterator<Item = &WorkerReport> {
        self.workers.iter().filter(|w| !w.status.is_finished())
    }

    pub fn all_finished(&self) -> bool {
        self.failures().next().is_none()
    }

    /// ➕ Counters summed over one pool. Failed workers contribute nothing, they took theirs with them.
    pub fn totals(&self, kind: PoolKind) -> WorkerSummary {
        let mut totals = WorkerSummary::default();
        for worker in self.pool(kind) {
            totals += worker.summary;
        }
        totals
    }

    /// 🍽️ The whole report as a table, ready for a terminal.
    pub fn render_table(&self) -> String {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL_CONDENSED);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec!["pool", "worker", "status", "records", "flushes", "messages", "reason"]);

        for worker in &self.workers {
            table.add_row(vec![
                Cell::new(worker.pool),
                Cell::new(worker.id).set_alignment(CellAlignment::Right),
                Cell::new(worker.status.label()),
                Cell::new(format_number(worker.summary.records)).set_alignment(CellAlignment::Right),
                Cell::new(format_number(worker.summary.flushes)).set_alignment(CellAlignment::Right),
                Cell::new(format_number(worker.summary.messages)).set_alignment(CellAlignment::Right),
                Cell::new(worker.status.reason().unwrap_or_default()),
            ]);
        }
        table.to_string()
    }

    /// 📡 Table at `info`. Failures were already logged one by one as they were joined,
    /// so here they only get a head count.
    pub fn log(&self) {
        info!("📊 shutdown report\n{}", self.render_table());
        let failed = self.failures().count();
        if failed > 0 {
            warn!("⚠️ {failed} of {} worker(s) did not finish cleanly", self.workers.len());
        }
    }
}

/// 🔢 `10000` → `10,000`. For eyes.
fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut result = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}
