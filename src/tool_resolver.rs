//! # Tool Path Resolver
//!
//! Trova i tool esterni (ffmpeg, ffprobe, HandBrakeCLI) nei diversi ambienti:
//! - Directory esplicita tramite variabile `TOOLS_DIR`
//! - Tool installati nel PATH di sistema

use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Tools the compressor may invoke
pub const KNOWN_TOOLS: [&str; 3] = ["ffmpeg", "ffprobe", "HandBrakeCLI"];

/// Tool path resolver for different deployment environments
pub struct ToolPathResolver {
    /// Directory overriding the system PATH
    tools_dir: Option<PathBuf>,
}

impl ToolPathResolver {
    /// Create a new path resolver
    pub fn new() -> Self {
        let tools_dir = env::var_os("TOOLS_DIR")
            .map(PathBuf::from)
            .filter(|p| p.is_dir());

        if let Some(ref dir) = tools_dir {
            debug!("Using tools directory from TOOLS_DIR: {:?}", dir);
        }

        Self { tools_dir }
    }

    /// Resolver looking only inside a given directory, then PATH
    pub fn with_tools_dir(tools_dir: PathBuf) -> Self {
        Self {
            tools_dir: Some(tools_dir),
        }
    }

    fn executable_name(tool_name: &str) -> String {
        if cfg!(windows) {
            format!("{}.exe", tool_name)
        } else {
            tool_name.to_string()
        }
    }

    /// Resolve the path to a specific tool
    pub fn resolve_tool(&self, tool_name: &str) -> Option<PathBuf> {
        if let Some(ref tools_dir) = self.tools_dir {
            let bundled = tools_dir.join(Self::executable_name(tool_name));
            if bundled.exists() {
                debug!("Using tool from tools dir: {} -> {:?}", tool_name, bundled);
                return Some(bundled);
            }
        }

        if let Some(system_path) = Self::find_in_system_path(tool_name) {
            debug!("Using system tool: {} -> {:?}", tool_name, system_path);
            return Some(system_path);
        }

        warn!("Tool not found: {}", tool_name);
        None
    }

    /// Find tool in system PATH
    fn find_in_system_path(tool_name: &str) -> Option<PathBuf> {
        let executable = Self::executable_name(tool_name);

        env::split_paths(&env::var_os("PATH")?)
            .map(|dir| dir.join(&executable))
            .find(|path| Path::new(path).is_file())
    }

    /// Check if a specific tool is available
    pub fn is_tool_available(&self, tool_name: &str) -> bool {
        self.resolve_tool(tool_name).is_some()
    }

    /// Installation hint shown when a tool is missing
    pub fn install_instructions(tool_name: &str) -> String {
        match tool_name {
            "ffmpeg" | "ffprobe" => "sudo apt-get install ffmpeg".to_string(),
            "HandBrakeCLI" => "sudo apt-get install handbrake-cli".to_string(),
            _ => format!("sudo apt-get install {}", tool_name),
        }
    }

    /// Check if a tool is available and provide installation instructions if not
    pub fn check_tool_with_instructions(&self, tool_name: &str) -> Result<PathBuf, String> {
        self.resolve_tool(tool_name).ok_or_else(|| {
            format!(
                "Tool '{}' not found in TOOLS_DIR or PATH.\nTo install it, run:\n  {}",
                tool_name,
                Self::install_instructions(tool_name)
            )
        })
    }

    /// Get a report of tool availability
    pub fn get_tools_report(&self) -> String {
        let mut report = String::from("Tool Path Resolver Report\n");
        report.push_str(&format!("Tools dir: {:?}\n", self.tools_dir));

        for tool in KNOWN_TOOLS {
            match self.resolve_tool(tool) {
                Some(path) => report.push_str(&format!("  [OK] {} -> {:?}\n", tool, path)),
                None => report.push_str(&format!(
                    "  [MISSING] {} (install with: {})\n",
                    tool,
                    Self::install_instructions(tool)
                )),
            }
        }

        report
    }
}

impl Default for ToolPathResolver {
    fn default() -> Self {
        Self::new()
    }
}
