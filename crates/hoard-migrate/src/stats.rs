use std::fmt;
use std::ops::AddAssign;

use serde::Serialize;

/// Counters for a migration run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MigrationStats {
  /// Regular files considered (links excluded).
  pub total_files: u64,
  /// Files whose path the registry already knew.
  pub already_registered: u64,
  /// Files registered as new artifacts.
  pub newly_registered: u64,
  /// Files registered as aliases of identical content.
  pub aliased: u64,
  pub errors: u64,
  pub total_size: u64,
}

impl AddAssign for MigrationStats {
  fn add_assign(&mut self, other: Self) {
    self.total_files += other.total_files;
    self.already_registered += other.already_registered;
    self.newly_registered += other.newly_registered;
    self.aliased += other.aliased;
    self.errors += other.errors;
    self.total_size += other.total_size;
  }
}

impl fmt::Display for MigrationStats {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "Total files scanned:     {}", self.total_files)?;
    writeln!(f, "Already registered:      {}", self.already_registered)?;
    writeln!(f, "Newly registered:        {}", self.newly_registered)?;
    writeln!(f, "Aliased duplicates:      {}", self.aliased)?;
    writeln!(f, "Errors:                  {}", self.errors)?;
    write!(f, "Total size:              {}", format_bytes(self.total_size))
  }
}

/// Human-readable size with two decimals, e.g. `1.50 GB`.
pub fn format_bytes(bytes: u64) -> String {
  let mut value = bytes as f64;
  for unit in ["B", "KB", "MB", "GB", "TB"] {
    if value < 1024.0 {
      return format!("{:.2} {}", value, unit);
    }
    value /= 1024.0;
  }
  format!("{:.2} PB", value)
}
