// Shrink report: what went in, what came out, what was removed.

use std::io::Write;

use colored::Colorize;
use serde::Serialize;

use crate::shaking::UsageInfo;

#[derive(Debug, Serialize)]
pub struct ShrinkReport {
    pub classes_in: usize,
    pub classes_out: usize,
    pub classes_removed: usize,
    pub methods_removed: usize,
    pub fields_removed: usize,
    pub dex_files: usize,
    pub removed_classes: Vec<String>,
}

impl ShrinkReport {
    pub fn from_usage(usage: &UsageInfo, classes_in: usize, dex_files: usize) -> ShrinkReport {
        let mut removed_classes = usage.removed_classes.clone();
        removed_classes.sort();
        ShrinkReport {
            classes_in,
            classes_out: usage.classes_kept,
            classes_removed: usage.removed_classes.len(),
            methods_removed: usage.methods_removed,
            fields_removed: usage.fields_removed,
            dex_files,
            removed_classes,
        }
    }

    pub fn write_terminal(&self, out: &mut impl Write) -> std::io::Result<()> {
        writeln!(out, "{}", "Shrink summary".bold())?;
        writeln!(
            out,
            "  classes: {} -> {} ({} removed)",
            self.classes_in,
            self.classes_out,
            self.classes_removed.to_string().green()
        )?;
        writeln!(
            out,
            "  members removed: {} methods, {} fields",
            self.methods_removed.to_string().green(),
            self.fields_removed.to_string().green()
        )?;
        writeln!(out, "  dex files: {}", self.dex_files)?;
        if !self.removed_classes.is_empty() {
            writeln!(out, "{}", "Removed classes".bold())?;
            for class in &self.removed_classes {
                writeln!(out, "  {}", class.dimmed())?;
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ShrinkReport {
        let mut usage = UsageInfo::default();
        usage.removed_classes.push("com.example.Dead".to_string());
        usage.classes_kept = 4;
        usage.methods_removed = 7;
        usage.fields_removed = 2;
        ShrinkReport::from_usage(&usage, 5, 1)
    }

    #[test]
    fn json_report_is_machine_readable() {
        let report = sample();
        let json = report.to_json().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["classes_in"], 5);
        assert_eq!(parsed["classes_removed"], 1);
        assert_eq!(parsed["removed_classes"][0], "com.example.Dead");
    }

    #[test]
    fn terminal_report_mentions_counts() {
        colored::control::set_override(false);
        let report = sample();
        let mut out = Vec::new();
        report.write_terminal(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("classes: 5 -> 4"));
        assert!(text.contains("7 methods"));
    }
}
