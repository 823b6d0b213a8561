//! Content hosting: the external collaborator that renders what the kiosk
//! shows.
//!
//! The controller only hands over a location reference; rendering itself is
//! someone else's job. Here that someone is a child process built from the
//! configured command line, typically a browser or media player embedding
//! itself into the surface via the `{hwnd}` placeholder. The child's fate is
//! deliberately decoupled from the surface: a renderer that fails to start
//! leaves a black, correctly-placed surface, never a visible desktop.

use std::process::{Child, Command};

use tracing::{debug, info, warn};
use vitrine_core_surface::{ContentError, ContentSink};

/// Child-process implementation of the content collaborator.
pub struct ContentHost {
    command: Vec<String>,
    window_handle: isize,
    child: Option<Child>,
}

impl ContentHost {
    pub fn new(command: Vec<String>, window_handle: isize) -> Self {
        Self {
            command,
            window_handle,
            child: None,
        }
    }

    /// Whether a renderer command is configured at all.
    pub fn is_configured(&self) -> bool {
        !self.command.is_empty()
    }

    /// Whether the renderer child is currently alive.
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}

/// Substitute `{source}` and `{hwnd}` placeholders into the renderer argv.
/// Without a `{source}` placeholder the source is appended as the last
/// argument.
fn substitute_args(command: &[String], source: &str, window_handle: isize) -> Vec<String> {
    let handle = window_handle.to_string();
    let mut args: Vec<String> = command
        .iter()
        .map(|arg| arg.replace("{source}", source).replace("{hwnd}", &handle))
        .collect();
    if !command.iter().any(|arg| arg.contains("{source}")) {
        args.push(source.to_string());
    }
    args
}

impl ContentSink for ContentHost {
    fn load(&mut self, source: &str) -> Result<(), ContentError> {
        if self.command.is_empty() {
            return Err(ContentError::Collaborator(
                "no renderer command configured".to_string(),
            ));
        }

        let args = substitute_args(&self.command, source, self.window_handle);
        debug!("Launching renderer: {:?}", args);

        match Command::new(&args[0]).args(&args[1..]).spawn() {
            Ok(child) => {
                info!("Renderer started (pid {})", child.id());
                self.child = Some(child);
                Ok(())
            }
            Err(e) => Err(ContentError::Collaborator(format!(
                "failed to start renderer {:?}: {}",
                args[0], e
            ))),
        }
    }
}

impl Drop for ContentHost {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                warn!("Failed to stop renderer: {}", e);
            }
            let _ = child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_substitute_source_placeholder() {
        let args = substitute_args(&cmd(&["renderer.exe", "--url", "{source}"]), "a.html", 7);
        assert_eq!(args, cmd(&["renderer.exe", "--url", "a.html"]));
    }

    #[test]
    fn test_substitute_hwnd_placeholder() {
        let args = substitute_args(
            &cmd(&["renderer.exe", "--embed", "{hwnd}", "{source}"]),
            "a.html",
            4242,
        );
        assert_eq!(args, cmd(&["renderer.exe", "--embed", "4242", "a.html"]));
    }

    #[test]
    fn test_source_appended_without_placeholder() {
        let args = substitute_args(&cmd(&["renderer.exe", "--kiosk"]), "b.html", 0);
        assert_eq!(args, cmd(&["renderer.exe", "--kiosk", "b.html"]));
    }

    #[test]
    fn test_load_without_command_is_error() {
        let mut host = ContentHost::new(Vec::new(), 0);
        assert!(!host.is_configured());
        let result = host.load("index.html");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_with_missing_binary_is_nonfatal_error() {
        let mut host = ContentHost::new(cmd(&["vitrine-test-no-such-renderer"]), 0);
        let result = host.load("index.html");
        assert!(matches!(result, Err(ContentError::Collaborator(_))));
        assert!(!host.is_running());
    }
}
