//! Shell command line construction.
//!
//! Kept separate from spawning so the argv/env policy can be checked without
//! allocating a pty.

use portable_pty::CommandBuilder;

use crate::config::SessionConfig;

/// Program, arguments and environment overrides for one candidate shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    /// Path or name of the shell binary.
    pub program: String,
    /// Arguments after the program name.
    pub args: Vec<String>,
    /// Variables set on top of the inherited environment, in order.
    pub env: Vec<(String, String)>,
}

impl ShellCommand {
    /// Builds the command line for `shell`.
    ///
    /// The shell runs as a login shell (if a login flag is configured) with a
    /// terminal type and `SSH_TTY` set so it behaves as if attached to an
    /// interactive ssh session. When the MOTD directory exists, its scripts
    /// run first and the same shell is then exec'd interactively.
    pub fn build(shell: &str, config: &SessionConfig) -> Self {
        let mut args = Vec::new();

        if let Some(flag) = config.login_flag() {
            args.push(flag.to_string());
        }

        if config.motd_dir.is_dir() {
            args.push("-c".to_string());
            args.push(format!(
                "{} {}; exec {}",
                config.motd_runner,
                config.motd_dir.display(),
                shell
            ));
        }

        let mut env = vec![
            ("SSH_TTY".to_string(), config.ssh_tty.clone()),
            ("TERM".to_string(), config.term.clone()),
        ];
        env.extend(config.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        Self {
            program: shell.to_string(),
            args,
            env,
        }
    }

    /// Converts into a `portable-pty` command, inheriting the agent's
    /// environment and applying the overrides.
    pub fn to_command_builder(&self) -> CommandBuilder {
        let mut cmd = CommandBuilder::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}
