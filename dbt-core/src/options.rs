//! Translator options
//!
//! Options come from a TOML document and/or from `-X:dbt:key=value` command
//! line flags that precede the guest program path:
//!
//! ```text
//! dbt [-X:dbt:...] <program> <args...>
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{DbtError, DbtResult};

/// Prefix of emulator flags on the command line
pub const OPTION_PREFIX: &str = "-X:dbt:";

/// Which execution strategy drives the run loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerKind {
    /// Decode and execute one instruction at a time
    Interpreter,
    /// Interpret cached traces
    #[serde(alias = "predecoding")]
    Caching,
    /// Interpret one instruction at a time, profiling indirect branches
    Profiling,
    /// Interpret traces until they become hot, then compile them
    #[default]
    Staged,
    /// Compile every trace on first visit
    #[serde(alias = "eager")]
    Translator,
}

impl fmt::Display for ControllerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControllerKind::Interpreter => "interpreter",
            ControllerKind::Caching => "caching",
            ControllerKind::Profiling => "profiling",
            ControllerKind::Staged => "staged",
            ControllerKind::Translator => "translator",
        };
        f.write_str(name)
    }
}

impl FromStr for ControllerKind {
    type Err = DbtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "interpreter" => Ok(ControllerKind::Interpreter),
            "caching" | "predecoding" => Ok(ControllerKind::Caching),
            "profiling" => Ok(ControllerKind::Profiling),
            "staged" => Ok(ControllerKind::Staged),
            "translator" | "eager" => Ok(ControllerKind::Translator),
            other => Err(DbtError::config(format!("unknown execution controller '{other}'"))),
        }
    }
}

/// Translator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DbtOptions {
    /// Execution strategy
    pub controller: ControllerKind,
    /// Heat a trace must exceed before the staged controller compiles it
    pub min_trace_value: u32,
    /// Traces with more instructions than this are memoised by the caching
    /// interpreter
    pub min_cached_trace_length: usize,
    /// Upper bound on the number of instructions in one trace
    pub max_trace_length: usize,
    /// Log run-loop decisions
    pub debug_runtime: bool,
    /// Log every system call
    pub debug_syscall: bool,
    /// Log trace compilation
    pub debug_translation: bool,
    /// Branch profile to load before running
    pub profile_load: Option<PathBuf>,
    /// File to save the branch profile to after running
    pub profile_save: Option<PathBuf>,
    /// Compile hot traces on worker threads instead of the run loop
    pub background_compilation: bool,
    /// Number of compile worker threads
    pub compiler_threads: usize,
}

impl Default for DbtOptions {
    fn default() -> Self {
        Self {
            controller: ControllerKind::Staged,
            min_trace_value: 20,
            min_cached_trace_length: 3,
            max_trace_length: 1024,
            debug_runtime: false,
            debug_syscall: false,
            debug_translation: false,
            profile_load: None,
            profile_save: None,
            background_compilation: false,
            compiler_threads: 1,
        }
    }
}

impl DbtOptions {
    /// Check option consistency
    ///
    /// # Errors
    ///
    /// [`DbtError::Config`] describing the first invalid option.
    pub fn validate(&self) -> DbtResult<()> {
        if self.max_trace_length == 0 {
            return Err(DbtError::config("maxTraceLength must be at least 1"));
        }
        if self.background_compilation && self.compiler_threads == 0 {
            return Err(DbtError::config(
                "background compilation needs at least one compiler thread",
            ));
        }
        Ok(())
    }

    /// Load options from a TOML document. Missing keys keep their defaults.
    pub fn from_toml(toml: &str) -> DbtResult<Self> {
        let options: Self = toml::from_str(toml)
            .map_err(|e| DbtError::config(format!("TOML parse error: {e}")))?;
        options.validate()?;
        Ok(options)
    }

    /// Load options from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> DbtResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Serialize the options as TOML
    pub fn to_toml(&self) -> DbtResult<String> {
        toml::to_string(self).map_err(|e| DbtError::config(format!("TOML encode error: {e}")))
    }

    /// Apply a single `-X:dbt:key=value` flag
    ///
    /// # Errors
    ///
    /// [`DbtError::Config`] for unknown keys, missing prefixes or values that
    /// do not parse.
    pub fn process_argument(&mut self, arg: &str) -> DbtResult<()> {
        let body = arg
            .strip_prefix(OPTION_PREFIX)
            .ok_or_else(|| DbtError::config(format!("'{arg}' is not an emulator option")))?;
        let (key, value) = body
            .split_once('=')
            .ok_or_else(|| DbtError::config(format!("option '{arg}' has no value")))?;

        match key {
            "controller" | "executionController" => self.controller = value.parse()?,
            "minTraceValue" => self.min_trace_value = parse_value(key, value)?,
            "minCachedTraceLength" => self.min_cached_trace_length = parse_value(key, value)?,
            "maxTraceLength" => self.max_trace_length = parse_value(key, value)?,
            "debugRuntime" => self.debug_runtime = parse_value(key, value)?,
            "debugSyscall" => self.debug_syscall = parse_value(key, value)?,
            "debugTranslation" => self.debug_translation = parse_value(key, value)?,
            "profileLoad" => self.profile_load = Some(PathBuf::from(value)),
            "profileSave" => self.profile_save = Some(PathBuf::from(value)),
            "backgroundCompilation" => self.background_compilation = parse_value(key, value)?,
            "compilerThreads" => self.compiler_threads = parse_value(key, value)?,
            _ => {
                return Err(DbtError::config(format!(
                    "unrecognised emulator option '{arg}'"
                )));
            }
        }
        Ok(())
    }

    /// Split a command line into emulator options, the guest program path and
    /// the guest's own arguments.
    ///
    /// Emulator flags are consumed up to the first argument that does not
    /// start with `-X:dbt:`.
    pub fn parse_arguments<I, A>(args: I) -> DbtResult<(Self, Option<String>, Vec<String>)>
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        let mut options = Self::default();
        let mut args = args.into_iter().map(Into::into);
        let mut program = None;

        for arg in args.by_ref() {
            if arg.starts_with(OPTION_PREFIX) {
                options.process_argument(&arg)?;
            } else {
                program = Some(arg);
                break;
            }
        }

        options.validate()?;
        Ok((options, program, args.collect()))
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> DbtResult<T>
where
    T::Err: fmt::Display,
{
    value
        .parse()
        .map_err(|e| DbtError::config(format!("bad value '{value}' for {key}: {e}")))
}
