//! Loads programs and feeds them input lines
//!
//! The [`Runtime`] owns the set of compiled programs and the shared
//! [`Store`]. Loading a program compiles it and registers its metrics;
//! reloading a program under the same name swaps it in atomically, and a
//! failed reload leaves the previous version running.

use std::collections::HashMap;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bytecode::{CompileError, Compiler, Program};
use crate::metrics::{MetricError, Store};
use crate::parser::{ParseError, Parser};
use crate::vm::Vm;

/// File extension of program sources picked up by [`Runtime::load_dir`]
pub const PROGRAM_EXTENSION: &str = "tl";

/// Why a program could not be loaded
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}", render_parse_errors(program, errors))]
    Parse {
        program: String,
        errors: Vec<ParseError>,
    },

    #[error("{}", render_compile_errors(errors))]
    Compile {
        program: String,
        errors: Vec<CompileError>,
    },

    #[error(transparent)]
    Store(#[from] MetricError),
}

fn render_parse_errors(program: &str, errors: &[ParseError]) -> String {
    let mut out = String::new();
    for (i, error) in errors.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let _ = write!(out, "{program}:{error}");
    }
    out
}

fn render_compile_errors(errors: &[CompileError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse and compile `source` as program `name`
pub fn compile(name: &str, source: &str) -> Result<Program, LoadError> {
    let ast = Parser::parse_program(source).map_err(|errors| LoadError::Parse {
        program: name.to_string(),
        errors,
    })?;
    Compiler::new(name)
        .with_source(source)
        .compile(&ast)
        .map_err(|errors| LoadError::Compile {
            program: name.to_string(),
            errors,
        })
}

/// Result of one line across every loaded program
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineOutcome {
    /// Some program matched the line
    pub matched: bool,
    /// Programs whose evaluation of this line failed
    pub errors: usize,
}

/// Outcome of loading a directory
#[derive(Debug, Default)]
pub struct LoadSummary {
    pub loaded: Vec<String>,
    pub errors: Vec<LoadError>,
}

pub struct Runtime {
    store: Arc<Store>,
    programs: RwLock<HashMap<String, Arc<Program>>>,
}

impl Runtime {
    #[must_use]
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            programs: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Compile `source` and install it as program `name`, replacing any
    /// previous version. On error the previous version keeps running.
    pub fn load_program(&self, name: &str, source: &str) -> Result<Arc<Program>, LoadError> {
        let program = match compile(name, source) {
            Ok(program) => program,
            Err(err) => {
                warn!(program = name, "program failed to load:\n{err}");
                return Err(err);
            }
        };

        for decl in program.metrics() {
            self.store.add(decl.instantiate(name))?;
        }

        let program = Arc::new(program);
        let replaced = self
            .programs
            .write()
            .insert(name.to_string(), Arc::clone(&program))
            .is_some();
        info!(
            program = name,
            metrics = program.metrics().len(),
            instructions = program.instructions().len(),
            replaced,
            "program loaded"
        );
        Ok(program)
    }

    /// Load a program file; the program is named after the file
    pub fn load_file(&self, path: &Path) -> Result<Arc<Program>, LoadError> {
        let source = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        self.load_program(&name, &source)
    }

    /// Load every `*.tl` file in `dir`, in name order. A bad file is
    /// reported in the summary and does not stop the others.
    pub fn load_dir(&self, dir: &Path) -> Result<LoadSummary, LoadError> {
        let io_error = |source| LoadError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == PROGRAM_EXTENSION) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut summary = LoadSummary::default();
        for path in paths {
            match self.load_file(&path) {
                Ok(program) => summary.loaded.push(program.name().to_string()),
                Err(err) => summary.errors.push(err),
            }
        }
        info!(
            dir = %dir.display(),
            loaded = summary.loaded.len(),
            failed = summary.errors.len(),
            "program directory loaded"
        );
        Ok(summary)
    }

    /// Stop running program `name`. Its metrics stay in the store.
    pub fn unload_program(&self, name: &str) -> bool {
        let removed = self.programs.write().remove(name).is_some();
        if removed {
            info!(program = name, "program unloaded");
        }
        removed
    }

    #[must_use]
    pub fn program(&self, name: &str) -> Option<Arc<Program>> {
        self.programs.read().get(name).cloned()
    }

    /// Names of the loaded programs, sorted
    #[must_use]
    pub fn program_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.programs.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Run every loaded program over `line`. Runtime errors abort only the
    /// failing program's evaluation and are counted, never propagated.
    pub fn process_line(&self, line: &str) -> LineOutcome {
        let programs: Vec<Arc<Program>> = self.programs.read().values().cloned().collect();
        let mut outcome = LineOutcome::default();
        for program in &programs {
            match Vm::execute(program, line, &self.store) {
                Ok(matched) => outcome.matched |= matched,
                Err(err) => {
                    outcome.errors += 1;
                    debug!(%err, line, "line evaluation failed");
                }
            }
        }
        outcome
    }
}
