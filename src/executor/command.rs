//! External process execution of per-tile commands

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;
use serde::{Deserialize, Serialize};
use tracing::debug;
use crate::error::{Error, Result};
use super::operation::{TileJob, TileOperation};

/// Longest stderr tail carried in an error message
const STDERR_TAIL: usize = 2000;

const PLACEHOLDERS: &[&str] = &[
    "input", "output", "tile_id", "row", "col", "xmin", "xmax", "ymin", "ymax",
];

/// Command line run once per tile
///
/// Arguments may contain `{input}`, `{input:<layer>}`, `{output}`,
/// `{tile_id}`, `{row}`, `{col}` and `{xmin}`, `{xmax}`, `{ymin}`, `{ymax}`
/// (the buffered extent). `{{` stands for a literal brace.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

enum Segment<'a> {
    Text(&'a str),
    Placeholder(&'a str),
}

fn parse(arg: &str) -> Result<Vec<Segment<'_>>> {
    let mut segments = Vec::new();
    let mut rest = arg;
    while let Some(start) = rest.find('{') {
        if start > 0 {
            segments.push(Segment::Text(&rest[..start]));
        }
        let after = &rest[start + 1..];
        if let Some(stripped) = after.strip_prefix('{') {
            segments.push(Segment::Text("{"));
            rest = stripped;
            continue;
        }
        let end = after.find('}').ok_or_else(|| {
            Error::Configuration(format!("Unclosed placeholder in command argument '{}'", arg))
        })?;
        segments.push(Segment::Placeholder(&after[..end]));
        rest = &after[end + 1..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Text(rest));
    }
    Ok(segments)
}

fn is_known(name: &str) -> bool {
    PLACEHOLDERS.contains(&name) || name.strip_prefix("input:").is_some_and(|layer| !layer.is_empty())
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            ..Default::default()
        }
    }

    /// Rejects an empty program and unknown placeholders
    pub fn validate(&self) -> Result<()> {
        if self.program.trim().is_empty() {
            return Err(Error::Configuration("Command program is empty".to_string()));
        }
        for arg in &self.args {
            for segment in parse(arg)? {
                if let Segment::Placeholder(name) = segment {
                    if !is_known(name) {
                        return Err(Error::Configuration(format!(
                            "Unknown placeholder '{{{}}}' in command argument '{}'",
                            name, arg
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Layers named by `{input:<layer>}` placeholders, in argument order
    pub fn input_layers(&self) -> Vec<String> {
        let mut layers: Vec<String> = Vec::new();
        for arg in &self.args {
            let Ok(segments) = parse(arg) else { continue };
            for segment in segments {
                if let Segment::Placeholder(name) = segment {
                    match name.strip_prefix("input:") {
                        Some(layer) if !layer.is_empty() && !layers.iter().any(|l| l == layer) => {
                            layers.push(layer.to_string())
                        }
                        _ => {}
                    }
                }
            }
        }
        layers
    }

    fn resolve(&self, name: &str, job: &TileJob) -> Result<String> {
        let extent = &job.tile.buffered;
        let path_of = |layer: &str| {
            job.input(layer)
                .map(|p| p.display().to_string())
                .ok_or_else(|| Error::execution(job.id(), format!("layer '{}' has no data for this tile", layer)))
        };
        Ok(match name {
            "input" => path_of(&job.primary)?,
            "output" => job.output.display().to_string(),
            "tile_id" => job.id().to_string(),
            "row" => job.id().row.to_string(),
            "col" => job.id().col.to_string(),
            "xmin" => extent.xmin.to_string(),
            "xmax" => extent.xmax.to_string(),
            "ymin" => extent.ymin.to_string(),
            "ymax" => extent.ymax.to_string(),
            other => match other.strip_prefix("input:") {
                Some(layer) if !layer.is_empty() => path_of(layer)?,
                _ => {
                    return Err(Error::Configuration(format!("Unknown placeholder '{{{}}}'", other)));
                }
            },
        })
    }

    /// Arguments with every placeholder substituted for one tile
    pub fn render_args(&self, job: &TileJob) -> Result<Vec<String>> {
        self.args
            .iter()
            .map(|arg| {
                let mut out = String::with_capacity(arg.len());
                for segment in parse(arg)? {
                    match segment {
                        Segment::Text(text) => out.push_str(text),
                        Segment::Placeholder(name) => out.push_str(&self.resolve(name, job)?),
                    }
                }
                Ok(out)
            })
            .collect()
    }
}

/// Exit status and captured output of a finished process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

fn stderr_tail(stderr: &str) -> &str {
    let trimmed = stderr.trim();
    if trimmed.len() <= STDERR_TAIL {
        return trimmed;
    }
    let mut start = trimmed.len() - STDERR_TAIL;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    &trimmed[start..]
}

/// Runs an external command for each tile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOperation {
    spec: CommandSpec,
}

impl CommandOperation {
    pub fn new(spec: CommandSpec) -> Result<Self> {
        spec.validate()?;
        Ok(Self { spec })
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    /// Runs the command for one tile and captures its output
    ///
    /// Only a spawn failure is an error here; the exit status is reported in
    /// the outcome.
    pub fn execute(&self, job: &TileJob) -> Result<ProcessOutcome> {
        let args = self.spec.render_args(job)?;
        let mut command = Command::new(&self.spec.program);
        command.args(&args).envs(&self.spec.env);
        if let Some(dir) = &self.spec.working_dir {
            command.current_dir(dir);
        }

        debug!(tile = %job.id(), program = %self.spec.program, ?args, "running command");
        let output = command.output().map_err(|e| {
            Error::execution(job.id(), format!("failed to start `{}`: {}", self.command_line(&args), e))
        })?;

        Ok(ProcessOutcome {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn command_line(&self, args: &[String]) -> String {
        std::iter::once(self.spec.program.as_str())
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl TileOperation for CommandOperation {
    fn process(&self, job: &TileJob) -> Result<()> {
        let outcome = self.execute(job)?;
        if !outcome.success() {
            let args = self.spec.render_args(job)?;
            let status = outcome
                .exit_code
                .map_or_else(|| "a signal".to_string(), |code| format!("exit code {}", code));
            return Err(Error::execution(
                job.id(),
                format!(
                    "`{}` ended with {}: {}",
                    self.command_line(&args),
                    status,
                    stderr_tail(&outcome.stderr)
                ),
            ));
        }
        if !job.output.exists() {
            return Err(Error::execution(
                job.id(),
                format!("`{}` succeeded but wrote no {}", self.spec.program, job.output.display()),
            ));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.spec.program
    }

    fn required_layers(&self) -> Vec<String> {
        self.spec.input_layers()
    }
}
