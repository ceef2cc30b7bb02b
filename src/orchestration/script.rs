//! PBS batch script rendering.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::SchedulerConfig;
use crate::util::shell_escape;
use crate::Result;

/// A PBS script that runs one command and reports failure to a summary
/// log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchScript {
    pub name: String,
    pub nodes: u32,
    pub ppn: u32,
    pub walltime: String,
    pub directives: Vec<String>,
    /// Joined stdout/stderr of the batch job.
    pub output: PathBuf,
    pub summary_log: PathBuf,
    pub command: Vec<String>,
}

impl BatchScript {
    pub fn new(name: &str, scheduler: &SchedulerConfig, command: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            nodes: scheduler.nodes,
            ppn: scheduler.ppn,
            walltime: scheduler.walltime.clone(),
            directives: scheduler.extra_directives.clone(),
            output: PathBuf::from(format!("{}.out", name)),
            summary_log: PathBuf::from(format!("{}_summary.log", name)),
            command,
        }
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_summary_log(mut self, summary_log: impl Into<PathBuf>) -> Self {
        self.summary_log = summary_log.into();
        self
    }

    pub fn render(&self) -> String {
        let mut script = String::from("#!/bin/bash\n");
        script.push_str(&format!("#PBS -l nodes={}:ppn={}\n", self.nodes, self.ppn));
        script.push_str(&format!("#PBS -l walltime={}\n", self.walltime));
        script.push_str(&format!("#PBS -N {}\n", self.name));
        script.push_str("#PBS -j oe\n");
        script.push_str(&format!("#PBS -o {}\n", self.output.display()));
        for directive in &self.directives {
            let directive = directive.trim();
            if directive.starts_with("#PBS") {
                script.push_str(directive);
            } else {
                script.push_str(&format!("#PBS {}", directive));
            }
            script.push('\n');
        }

        let command: Vec<String> = self.command.iter().map(|a| shell_escape(a)).collect();
        let summary = shell_escape(&self.summary_log.display().to_string());
        script.push('\n');
        script.push_str(&command.join(" "));
        script.push('\n');
        script.push_str("status=$?\n");
        script.push_str("if [ $status -ne 0 ]; then\n");
        script.push_str(&format!(
            "    echo \"FAIL: {} exited with status $status\" >> {}\n",
            self.name, summary
        ));
        script.push_str("fi\n");
        script.push_str("exit $status\n");
        script
    }

    /// Write to `{dir}/{name}.pbs`.
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.pbs", self.name));
        fs::write(&path, self.render())?;
        Ok(path)
    }
}
