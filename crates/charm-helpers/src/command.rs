//! Running external programs (hook tools, package managers, service control).
//!
//! Everything that leaves the process goes through [`CommandRunner`], so tests can swap in a
//! recording implementation instead of spawning real processes.
use std::{process::Command, string::FromUtf8Error};

use snafu::{ResultExt, Snafu, ensure};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to spawn {command:?}"))]
    Spawn {
        source: std::io::Error,
        command: String,
    },

    #[snafu(display("{command:?} failed with exit code {code:?}: {stderr}"))]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[snafu(display("{command:?} wrote invalid UTF-8 to stdout"))]
    InvalidOutput {
        source: FromUtf8Error,
        command: String,
    },
}

/// Executes programs on behalf of the charm.
pub trait CommandRunner {
    /// Runs `program` with `args` and returns everything it wrote to stdout.
    fn output(&self, program: &str, args: &[String]) -> Result<String>;

    /// Runs `program` with `args`, only checking that it succeeded.
    fn run(&self, program: &str, args: &[String]) -> Result<()>;
}

/// Spawns real processes via [`std::process::Command`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn output(&self, program: &str, args: &[String]) -> Result<String> {
        let command = display_command(program, args);
        tracing::debug!(command, "calling");

        let output = Command::new(program)
            .args(args)
            .output()
            .with_context(|_| SpawnSnafu {
                command: command.clone(),
            })?;
        ensure!(
            output.status.success(),
            FailedSnafu {
                command: command.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            }
        );

        String::from_utf8(output.stdout).context(InvalidOutputSnafu { command })
    }

    fn run(&self, program: &str, args: &[String]) -> Result<()> {
        self.output(program, args).map(|_| ())
    }
}

/// Renders a command line the way it is logged and reported in errors.
pub fn display_command(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{cell::RefCell, collections::VecDeque};

    use super::*;

    /// Records every invocation and replays canned stdout in call order.
    #[derive(Default)]
    pub struct RecordingRunner {
        pub calls: RefCell<Vec<String>>,
        pub outputs: RefCell<VecDeque<Result<String, String>>>,
    }

    impl RecordingRunner {
        pub fn with_outputs<'a>(outputs: impl IntoIterator<Item = &'a str>) -> Self {
            Self {
                calls: RefCell::default(),
                outputs: RefCell::new(outputs.into_iter().map(|o| Ok(o.to_owned())).collect()),
            }
        }

        pub fn failing(message: &str) -> Self {
            Self {
                calls: RefCell::default(),
                outputs: RefCell::new(VecDeque::from([Err(message.to_owned())])),
            }
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }
    }

    impl CommandRunner for RecordingRunner {
        fn output(&self, program: &str, args: &[String]) -> Result<String> {
            let command = display_command(program, args);
            self.calls.borrow_mut().push(command.clone());
            match self.outputs.borrow_mut().pop_front() {
                Some(Ok(stdout)) => Ok(stdout),
                Some(Err(stderr)) => FailedSnafu {
                    command,
                    code: Some(1),
                    stderr,
                }
                .fail(),
                None => Ok(String::new()),
            }
        }

        fn run(&self, program: &str, args: &[String]) -> Result<()> {
            self.output(program, args).map(|_| ())
        }
    }
}
