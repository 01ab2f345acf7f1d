use crate::error::Result;
use crate::hash::Hash;
use crate::repo::Repo;
use crate::revision::RevisionGraph;
use crate::types::Commit;

/// commit with its hash for log output
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub hash: Hash,
    pub commit: Commit,
}

/// commit history of a revision, newest first
pub fn log(repo: &Repo, expr: &str, max_count: Option<usize>) -> Result<Vec<LogEntry>> {
    let graph = RevisionGraph::new(repo);
    let start = graph.resolve(expr)?;

    let mut entries: Vec<LogEntry> = graph
        .lineage(&start)?
        .into_iter()
        .map(|(hash, commit)| LogEntry { hash, commit })
        .collect();

    // lineage order breaks timestamp ties, so children stay ahead of parents
    entries.sort_by(|a, b| b.commit.timestamp.cmp(&a.commit.timestamp));

    if let Some(max) = max_count {
        entries.truncate(max);
    }

    Ok(entries)
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "commit {}", self.hash)?;
        if self.commit.is_merge() {
            let parents: Vec<String> = self.commit.parents.iter().map(Hash::short).collect();
            writeln!(f, "Merge:  {}", parents.join(" "))?;
        }
        writeln!(f, "Task:   {}", self.commit.task_id)?;
        writeln!(f, "Author: {}", self.commit.author)?;
        writeln!(f, "Date:   {}", format_timestamp(self.commit.timestamp))?;

        writeln!(f)?;
        for line in self.commit.message.lines() {
            writeln!(f, "    {}", line)?;
        }

        Ok(())
    }
}

/// `YYYY-MM-DD HH:MM:SS` in UTC
fn format_timestamp(timestamp: i64) -> String {
    let days = timestamp.div_euclid(86_400);
    let secs = timestamp.rem_euclid(86_400);
    let (year, month, day) = civil_from_days(days);

    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        year,
        month,
        day,
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60
    )
}

/// proleptic gregorian date for a day count relative to 1970-01-01
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}
