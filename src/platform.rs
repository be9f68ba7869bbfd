//! # Platform-specific utilities
//!
//! Questo modulo centralizza la logica cross-platform per i comandi esterni
//! (ffmpeg, ffprobe, HandBrakeCLI) e la verifica delle dipendenze prima di
//! avviare un batch.

use crate::error::CompressError;
use crate::tool_resolver::ToolPathResolver;
use std::ffi::OsString;
use std::sync::OnceLock;

/// Platform-specific command manager with tool resolution
pub struct PlatformCommands {
    which_command: &'static str,
    tool_resolver: ToolPathResolver,
}

impl PlatformCommands {
    /// Get the singleton instance
    pub fn instance() -> &'static Self {
        static INSTANCE: OnceLock<PlatformCommands> = OnceLock::new();
        INSTANCE.get_or_init(Self::new)
    }

    fn new() -> Self {
        Self {
            which_command: if cfg!(windows) { "where" } else { "which" },
            tool_resolver: ToolPathResolver::new(),
        }
    }

    /// Program to spawn for a tool: the resolved path, or the bare name for PATH lookup
    pub fn get_command(&self, base_name: &str) -> OsString {
        match self.tool_resolver.resolve_tool(base_name) {
            Some(path) => path.into_os_string(),
            None if cfg!(windows) => OsString::from(format!("{}.exe", base_name)),
            None => OsString::from(base_name),
        }
    }

    /// Get the command used to check if a program exists
    pub fn which_command(&self) -> &str {
        self.which_command
    }

    /// Check if a command is available on the system
    pub async fn is_command_available(&self, base_name: &str) -> bool {
        if self.tool_resolver.is_tool_available(base_name) {
            return true;
        }

        let result = tokio::process::Command::new(self.which_command)
            .arg(base_name)
            .output()
            .await;

        match result {
            Ok(output) => output.status.success(),
            Err(_) => false,
        }
    }

    /// Fails with the first missing tool, including install instructions
    pub async fn check_dependencies(&self, tools: &[&str]) -> Result<(), CompressError> {
        for tool in tools {
            if !self.is_command_available(tool).await {
                let hint = self
                    .tool_resolver
                    .check_tool_with_instructions(tool)
                    .err()
                    .unwrap_or_else(|| format!("{} is required", tool));
                return Err(CompressError::MissingDependency(hint));
            }
        }
        Ok(())
    }

    /// Get a report of all available tools
    pub fn get_tools_report(&self) -> String {
        self.tool_resolver.get_tools_report()
    }
}
