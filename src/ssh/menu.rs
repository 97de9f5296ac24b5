//! JumpServer menu navigation
//!
//! After login the bastion shows an `Opt>` menu. Typing a search token either
//! connects straight to the single matching asset, opens a `[Host]>` picker
//! when several match, or drops into an asset list with a `Search:` box. A
//! token that matches nothing returns to `Opt>`.
//!
//! Commands run in the target's interactive shell, so completion and exit
//! status are detected with an end marker echoed after the command.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};

use super::command::CommandOutput;
use super::terminal::{tail, Expect, Terminal};
use crate::error::{JumpSshError, Result};

static OPT_PROMPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Opt>").expect("OPT_PROMPT is a compile-time constant"));

static HOST_PROMPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[Host\]>").expect("HOST_PROMPT is a compile-time constant"));

static SEARCH_PROMPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Search:").expect("SEARCH_PROMPT is a compile-time constant"));

static USER_SHELL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\s").expect("USER_SHELL is a compile-time constant"));

static ROOT_SHELL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#\s").expect("ROOT_SHELL is a compile-time constant"));

static USER_SHELL_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\s*\r?\n").expect("USER_SHELL_LINE is a compile-time constant"));

static ROOT_SHELL_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#\s*\r?\n").expect("ROOT_SHELL_LINE is a compile-time constant"));

// CSI sequences, OSC window titles and carriage returns
static TERMINAL_NOISE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[a-zA-Z]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\r")
        .expect("TERMINAL_NOISE is a compile-time constant")
});

/// Prefix of the end marker printed after each command
pub const END_MARKER_PREFIX: &str = "JUMP_END_";

/// Delays and bounds for one menu walk
#[derive(Debug, Clone, Copy)]
pub struct MenuTimings {
    /// Bound for each menu prompt
    pub expect: Duration,

    /// How long to wait for the re-rendered `Opt>`
    pub drain: Duration,

    /// Pause after the menu is stable
    pub settle: Duration,

    /// Pause after reaching the target shell
    pub banner_wait: Duration,

    /// Bound for flushing the login banner
    pub banner_flush: Duration,
}

impl MenuTimings {
    /// Standard timings with the given prompt bound
    pub fn new(expect: Duration) -> Self {
        Self {
            expect,
            drain: Duration::from_millis(1500),
            settle: Duration::from_millis(300),
            banner_wait: Duration::from_secs(1),
            banner_flush: Duration::from_secs(8),
        }
    }
}

/// Drives the bastion menu over an interactive terminal
pub struct JumpMenu<T: Terminal> {
    expect: Expect<T>,
    timings: MenuTimings,
}

impl<T: Terminal> JumpMenu<T> {
    /// Wrap a terminal that has just logged into the bastion
    pub fn new(terminal: T, timings: MenuTimings) -> Self {
        Self {
            expect: Expect::new(terminal),
            timings,
        }
    }

    /// Give back the wrapped terminal
    pub fn into_inner(self) -> T {
        self.expect.into_inner()
    }

    /// Wait until the `Opt>` menu is ready for input
    ///
    /// JumpServer prints `Opt>`, erases it and draws it again. Input sent
    /// between the two renders is lost, so the second render is awaited too.
    pub async fn wait_for_menu(&mut self) -> Result<()> {
        let found = self.expect.expect(&[&*OPT_PROMPT], self.timings.expect).await?;
        if found.is_none() {
            return Err(JumpSshError::timeout(
                "waiting for the bastion menu",
                self.timings.expect.as_secs(),
            ));
        }

        if self.expect.expect(&[&*OPT_PROMPT], self.timings.drain).await?.is_none() {
            debug!("menu rendered once");
        }
        tokio::time::sleep(self.timings.settle).await;
        Ok(())
    }

    /// Search for `token` and enter the target's shell
    ///
    /// The first entry is taken when several assets match.
    pub async fn select_target(&mut self, token: &str) -> Result<()> {
        // `send` rather than `send_line`: the menu reads raw keystrokes
        self.expect.send(&format!("{}\r", token)).await?;

        let found = self
            .expect
            .expect(
                &[&*HOST_PROMPT, &*SEARCH_PROMPT, &*OPT_PROMPT, &*USER_SHELL, &*ROOT_SHELL],
                self.timings.expect,
            )
            .await?
            .ok_or_else(|| {
                JumpSshError::timeout(
                    format!("searching the bastion for '{}'", token),
                    self.timings.expect.as_secs(),
                )
            })?;

        match found.index {
            0 => {
                debug!("several assets match '{}', taking the first", token);
                self.pick_first(token).await?;
            }
            1 => {
                debug!("asset list search box, repeating '{}'", token);
                self.expect.send(&format!("{}\r", token)).await?;
                let found = self
                    .expect
                    .expect(&[&*USER_SHELL, &*ROOT_SHELL, &*HOST_PROMPT], self.timings.expect)
                    .await?
                    .ok_or_else(|| {
                        JumpSshError::timeout(
                            format!("searching the asset list for '{}'", token),
                            self.timings.expect.as_secs(),
                        )
                    })?;
                if found.index == 2 {
                    self.pick_first(token).await?;
                }
            }
            2 => {
                return Err(JumpSshError::target(format!(
                    "bastion found no asset matching '{}'",
                    token
                )));
            }
            _ => debug!("connected straight to '{}'", token),
        }

        info!("Entered target shell for '{}'", token);
        self.flush_banner().await
    }

    async fn pick_first(&mut self, token: &str) -> Result<()> {
        self.expect.send("1\r").await?;
        let found = self
            .expect
            .expect(&[&*USER_SHELL, &*ROOT_SHELL], self.timings.expect)
            .await?;
        if found.is_none() {
            return Err(JumpSshError::target(format!(
                "no shell after selecting '{}', last output: {:?}",
                token,
                tail(self.expect.pending())
            )));
        }
        Ok(())
    }

    async fn flush_banner(&mut self) -> Result<()> {
        tokio::time::sleep(self.timings.banner_wait).await;
        self.expect.send_line("").await?;
        let flushed = self
            .expect
            .expect(&[&*USER_SHELL_LINE, &*ROOT_SHELL_LINE], self.timings.banner_flush)
            .await?;
        if flushed.is_none() {
            warn!("no fresh prompt after login banner, continuing");
        }
        Ok(())
    }

    /// Run `command` in the target shell and wait for its end marker
    ///
    /// The marker is sent as two adjacent quoted strings, so the echoed input
    /// line never contains it verbatim and only the shell's output matches.
    pub async fn run(&mut self, command: &str, marker_id: u64, limit: Duration) -> Result<CommandOutput> {
        let marker = Regex::new(&format!(r"{}{}:(\d+)\r?\n", END_MARKER_PREFIX, marker_id))
            .map_err(|e| JumpSshError::session_io(format!("invalid end marker: {}", e)))?;

        self.expect
            .send_line(&marker_command(command, marker_id))
            .await?;

        let found = self
            .expect
            .expect(&[&marker], limit)
            .await?
            .ok_or_else(|| JumpSshError::timeout("waiting for the remote command", limit.as_secs()))?;

        let exit_code = marker
            .captures(&found.text)
            .and_then(|caps| caps.get(1))
            .and_then(|code| code.as_str().parse::<u32>().ok())
            .ok_or_else(|| {
                JumpSshError::session_io(format!("unreadable end marker {:?}", found.text))
            })?;

        Ok(CommandOutput {
            stdout: clean_output(&found.before, marker_id),
            stderr: String::new(),
            exit_code: Some(exit_code),
        })
    }
}

/// The line typed into the target shell
///
/// A command that already ends in `&` or `;` is followed by the echo
/// directly, since `cmd &;` and `cmd ;;` are syntax errors.
pub fn marker_command(command: &str, marker_id: u64) -> String {
    let trimmed = command.trim_end();
    let separator = if trimmed.ends_with('&') || trimmed.ends_with(';') {
        " "
    } else {
        "; "
    };
    format!(
        "{}{}echo '{}''{}:'$?",
        trimmed, separator, END_MARKER_PREFIX, marker_id
    )
}

/// Remove control sequences and the echoed input from raw terminal output
///
/// Leading and trailing blank lines are dropped; blank lines inside the
/// output are kept.
pub fn clean_output(raw: &str, marker_id: u64) -> String {
    let cleaned = TERMINAL_NOISE.replace_all(raw, "");

    // The echo of the typed line ends with the split marker
    let echoed = format!("'{}''{}:'$?", END_MARKER_PREFIX, marker_id);
    let body = match cleaned.rfind(&echoed) {
        Some(pos) => {
            let rest = &cleaned[pos + echoed.len()..];
            rest.split_once('\n').map_or("", |(_, after)| after)
        }
        None => cleaned
            .trim_start_matches('\n')
            .split_once('\n')
            .map_or("", |(_, after)| after),
    };

    let lines: Vec<&str> = body.lines().collect();
    let first = lines.iter().position(|l| !l.trim().is_empty());
    let last = lines.iter().rposition(|l| !l.trim().is_empty());
    match (first, last) {
        (Some(first), Some(last)) => lines[first..=last]
            .iter()
            .map(|l| l.trim_end())
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::super::terminal::fake::FakeTerminal;
    use super::*;

    fn fast() -> MenuTimings {
        MenuTimings {
            expect: Duration::from_millis(200),
            drain: Duration::from_millis(20),
            settle: Duration::from_millis(1),
            banner_wait: Duration::from_millis(1),
            banner_flush: Duration::from_millis(50),
        }
    }

    const MENU: &str = "Welcome to JumpServer\r\nOpt> \x1b[5D\x1b[KOpt> ";

    #[tokio::test]
    async fn test_wait_for_menu() {
        let term = FakeTerminal::new(&[MENU], vec![]);
        let mut menu = JumpMenu::new(term, fast());
        menu.wait_for_menu().await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_menu_timeout() {
        let term = FakeTerminal::new(&["Last login: yesterday\r\n"], vec![]);
        let mut menu = JumpMenu::new(term, fast());
        let err = menu.wait_for_menu().await.unwrap_err();
        assert!(matches!(err, JumpSshError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_select_direct_hit() {
        let term = FakeTerminal::new(
            &[MENU],
            vec![
                vec!["Connecting to VM-4-13\r\n[root@vm-4-13 ~]# "],
                vec!["\r\n[root@vm-4-13 ~]# \r\n"],
            ],
        );
        let sent = term.sent.clone();
        let mut menu = JumpMenu::new(term, fast());
        menu.wait_for_menu().await.unwrap();
        menu.select_target("4.13").await.unwrap();
        assert_eq!(sent.lock().unwrap()[0], "4.13\r");
    }

    #[tokio::test]
    async fn test_select_picks_first_of_many() {
        let term = FakeTerminal::new(
            &[MENU],
            vec![
                vec!["  1 | VM-4-13\r\n  2 | VM-4-130\r\n[Host]> "],
                vec!["[deploy@vm-4-13 ~]$ "],
                vec!["[deploy@vm-4-13 ~]$ \r\n"],
            ],
        );
        let sent = term.sent.clone();
        let mut menu = JumpMenu::new(term, fast());
        menu.wait_for_menu().await.unwrap();
        menu.select_target("4.13").await.unwrap();
        assert_eq!(sent.lock().unwrap()[1], "1\r");
    }

    #[tokio::test]
    async fn test_select_through_search_box() {
        let term = FakeTerminal::new(
            &[MENU],
            vec![
                vec!["ID | Hostname\r\nSearch: "],
                vec!["[Host]> "],
                vec!["[deploy@vm-4-13 ~]$ "],
                vec!["[deploy@vm-4-13 ~]$ \r\n"],
            ],
        );
        let sent = term.sent.clone();
        let mut menu = JumpMenu::new(term, fast());
        menu.wait_for_menu().await.unwrap();
        menu.select_target("4.13").await.unwrap();
        assert_eq!(
            sent.lock().unwrap()[..3],
            ["4.13\r".to_string(), "4.13\r".to_string(), "1\r".to_string()]
        );
    }

    #[tokio::test]
    async fn test_select_not_found() {
        let term = FakeTerminal::new(&[MENU], vec![vec!["No asset found\r\nOpt> "]]);
        let mut menu = JumpMenu::new(term, fast());
        menu.wait_for_menu().await.unwrap();
        let err = menu.select_target("9.99").await.unwrap_err();
        assert_eq!(err.kind(), "TargetResolutionError");
        assert!(err.to_string().contains("'9.99'"));
    }

    #[tokio::test]
    async fn test_run_parses_exit_code_and_output() {
        let typed = marker_command("ls /opt", 42);
        let echo = format!("{}\r\n", typed);
        let term = FakeTerminal::new(
            &[],
            vec![vec![
                echo.as_str(),
                "app\r\nlogs\r\n",
                "JUMP_END_42:0\r\n[root@vm ~]# ",
            ]],
        );
        let mut menu = JumpMenu::new(term, fast());
        let output = menu.run("ls /opt", 42, Duration::from_secs(1)).await.unwrap();
        assert_eq!(output.stdout, "app\nlogs");
        assert_eq!(output.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_run_non_zero_exit() {
        let term = FakeTerminal::new(
            &[],
            vec![vec![
                "cd /nope && ls; echo 'JUMP_END_''7:'$?\r\n",
                "bash: cd: /nope: No such file or directory\r\nJUMP_END_7:1",
                "\r\n",
            ]],
        );
        let mut menu = JumpMenu::new(term, fast());
        let output = menu
            .run("cd /nope && ls", 7, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(1));
        assert_eq!(output.stdout, "bash: cd: /nope: No such file or directory");
    }

    #[tokio::test]
    async fn test_run_waits_for_full_exit_code() {
        let term = FakeTerminal::new(
            &[],
            vec![vec!["x; echo 'JUMP_END_''5:'$?\r\n", "JUMP_END_5:12", "7\r\n"]],
        );
        let mut menu = JumpMenu::new(term, fast());
        let output = menu.run("x", 5, Duration::from_secs(1)).await.unwrap();
        assert_eq!(output.exit_code, Some(127));
    }

    #[tokio::test]
    async fn test_run_timeout() {
        let term = FakeTerminal::new(&[], vec![vec!["sleep 600; echo 'JUMP_END_''1:'$?\r\n"]]);
        let mut menu = JumpMenu::new(term, fast());
        let err = menu
            .run("sleep 600", 1, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, JumpSshError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_run_with_unbounded_timeout() {
        let term = FakeTerminal::new(
            &[],
            vec![vec!["uptime; echo 'JUMP_END_''8:'$?\r\n", " 10:00 up 3 days\r\nJUMP_END_8:0\r\n"]],
        );
        let mut menu = JumpMenu::new(term, fast());
        let output = menu
            .run("uptime", 8, Duration::from_secs(u64::MAX))
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.stdout, " 10:00 up 3 days");
    }

    #[tokio::test]
    async fn test_run_keeps_split_multibyte_output() {
        let term = FakeTerminal::new(
            &[],
            vec![vec!["echo 部署完成; echo 'JUMP_END_''6:'$?\r\n", "部署完成\r\nJUMP_END_6:0\r\n"]],
        );
        let mut menu = JumpMenu::new(term, fast());
        let output = menu.run("echo 部署完成", 6, Duration::from_secs(1)).await.unwrap();
        assert_eq!(output.stdout, "部署完成");
    }

    #[test]
    fn test_marker_command_after_background_job() {
        assert_eq!(
            marker_command("nohup ./server &", 4),
            "nohup ./server & echo 'JUMP_END_''4:'$?"
        );
        assert_eq!(marker_command("make;", 4), "make; echo 'JUMP_END_''4:'$?");
        assert_eq!(marker_command("a && b ", 4), "a && b; echo 'JUMP_END_''4:'$?");
    }

    #[test]
    fn test_marker_command_splits_marker() {
        let line = marker_command("uptime", 1700000000);
        assert_eq!(line, "uptime; echo 'JUMP_END_''1700000000:'$?");
        assert!(!line.contains("JUMP_END_1700000000"));
    }

    #[test]
    fn test_clean_output_strips_ansi_and_echo() {
        let raw = "\x1b]0;root@vm:~\x07kubectl get ns; echo 'JUMP_END_''9:'$?\r\n\
                   \x1b[1mNAME\x1b[0m      STATUS\r\n\r\ndefault   Active\r\n";
        assert_eq!(clean_output(raw, 9), "NAME      STATUS\n\ndefault   Active");
    }

    #[test]
    fn test_clean_output_without_echo_drops_first_line() {
        let raw = "whoami\r\nroot\r\n";
        assert_eq!(clean_output(raw, 3), "root");
    }

    #[test]
    fn test_clean_output_empty() {
        assert_eq!(clean_output("true; echo 'JUMP_END_''3:'$?\r\n", 3), "");
        assert_eq!(clean_output("", 3), "");
    }
}
