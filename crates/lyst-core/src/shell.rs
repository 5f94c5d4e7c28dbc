//! Interactive dashboard loop and the terminal implementations of the
//! dialog traits.

use std::io::{self, BufRead, Write};

use anyhow::anyhow;
use tracing::{debug, instrument, warn};

use crate::commands::{
    expand_command_abbrev, known_command_names, resolve_list, resolve_todo_ref, split_todo_ref,
};
use crate::dashboard::{Dashboard, Outcome, Prompter};
use crate::error::ValidationError;
use crate::identity::AuthorizationPrompt;
use crate::model::{ListId, TodoId};
use crate::render::Renderer;

const HELP: &str = "\
Commands (any unique prefix works):
  login              sign in with Google
  logout             sign out
  whoami             show the signed-in user
  refresh            reload lists from the server
  new <title>        create a list
  open <N>           expand or collapse list N
  edit <N>           rename list N (next line is the new title)
  edit <N.M>         edit todo M of list N (next line is the new text)
  delete <N>         delete list N and all of its todos
  add <N> <text>     add a todo to list N
  toggle <N.M>       mark todo M of list N done or not done
  remove <N.M>       delete todo M of list N
  help               show this text
  quit               leave
While editing, enter `.cancel` to stop without saving.";

pub trait LineSource {
    /// Next line of input without its newline, or `None` at end of input.
    fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>>;
}

/// Reads from the process's stdin. The lock is taken per line so prompts
/// raised mid-command can read too.
pub struct StdinSource;

impl LineSource for StdinSource {
    fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>> {
        let mut stdout = io::stdout();
        write!(stdout, "{prompt}")?;
        stdout.flush()?;
        read_stdin_line()
    }
}

/// Feeds lines from any reader; prompts are not echoed.
pub struct ScriptSource<R> {
    reader: R,
}

impl<R: BufRead> ScriptSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: BufRead> LineSource for ScriptSource<R> {
    fn read_line(&mut self, _prompt: &str) -> io::Result<Option<String>> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(trim_newline(line)))
    }
}

fn read_stdin_line() -> io::Result<Option<String>> {
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(trim_newline(line)))
}

fn trim_newline(mut line: String) -> String {
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    line
}

/// y/N confirmation and alerts on the terminal.
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn confirm(&self, message: &str) -> bool {
        print!("{message} [y/N] ");
        if io::stdout().flush().is_err() {
            return false;
        }
        match read_stdin_line() {
            Ok(Some(answer)) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            Ok(None) => false,
            Err(err) => {
                warn!(error = %err, "failed to read confirmation");
                false
            }
        }
    }

    fn alert(&self, message: &str) {
        eprintln!("{message}");
    }
}

/// Confirms everything, for `--yes`.
pub struct AssumeYes;

impl Prompter for AssumeYes {
    fn confirm(&self, message: &str) -> bool {
        debug!(message, "confirmation assumed");
        true
    }

    fn alert(&self, message: &str) {
        eprintln!("{message}");
    }
}

/// Prints the Google consent URL and reads back the redirected URL.
pub struct TerminalAuthorization;

impl AuthorizationPrompt for TerminalAuthorization {
    fn authorize(&self, auth_url: &str) -> Option<String> {
        println!("Open this URL in your browser and sign in with Google:\n\n  {auth_url}\n");
        println!("Then paste the full URL you were redirected to (empty line to cancel):");
        print!("> ");
        io::stdout().flush().ok()?;

        match read_stdin_line() {
            Ok(Some(line)) if !line.trim().is_empty() => Some(line.trim().to_string()),
            Ok(_) => None,
            Err(err) => {
                warn!(error = %err, "failed to read authorization response");
                None
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Shell<'d, W: Write> {
    dashboard: &'d mut Dashboard,
    renderer: Renderer,
    out: W,
    known: Vec<&'static str>,
}

impl<'d, W: Write> Shell<'d, W> {
    pub fn new(dashboard: &'d mut Dashboard, renderer: Renderer, out: W) -> Self {
        Self {
            dashboard,
            renderer,
            out,
            known: known_command_names(),
        }
    }

    pub fn into_output(self) -> W {
        self.out
    }

    #[instrument(skip_all)]
    pub async fn run(&mut self, input: &mut dyn LineSource) -> anyhow::Result<()> {
        self.render()?;
        writeln!(self.out, "Type `help` for commands.")?;

        loop {
            let prompt = if self.is_editing() { "edit> " } else { "lyst> " };
            let Some(line) = input.read_line(prompt)? else {
                break;
            };

            if self.execute(&line).await? == Flow::Quit {
                break;
            }
        }

        self.dashboard.teardown();
        Ok(())
    }

    fn is_editing(&self) -> bool {
        self.dashboard.list_edit().is_some() || self.dashboard.todo_edit().is_some()
    }

    /// Handles one line of input and re-renders.
    pub async fn execute(&mut self, line: &str) -> anyhow::Result<Flow> {
        if self.is_editing() {
            self.finish_edit(line).await?;
            self.render()?;
            return Ok(Flow::Continue);
        }

        let line = line.trim();
        if line.is_empty() {
            return Ok(Flow::Continue);
        }

        let (word, rest) = line
            .split_once(char::is_whitespace)
            .map(|(w, r)| (w, r.trim()))
            .unwrap_or((line, ""));

        let Some(command) = expand_command_abbrev(word, &self.known) else {
            writeln!(self.out, "Unknown or ambiguous command: {word}. Type `help`.")?;
            return Ok(Flow::Continue);
        };

        debug!(command, args = rest, "shell command");
        if command == "quit" {
            return Ok(Flow::Quit);
        }

        if let Err(err) = self.run_command(command, rest).await {
            writeln!(self.out, "error: {err:#}")?;
        }

        if command != "help" {
            self.render()?;
        }
        Ok(Flow::Continue)
    }

    async fn run_command(&mut self, command: &str, args: &str) -> anyhow::Result<()> {
        let outcome = match command {
            "help" => {
                writeln!(self.out, "{HELP}")?;
                return Ok(());
            }
            "login" => {
                if self.dashboard.user().is_some() {
                    return Err(anyhow!("already signed in; run `logout` first"));
                }
                self.dashboard.sign_in().await
            }
            "logout" => self.dashboard.sign_out().await,
            "whoami" => {
                match self.dashboard.user() {
                    Some(user) => writeln!(self.out, "{} ({})", user.label(), user.uid)?,
                    None => writeln!(self.out, "Not signed in.")?,
                }
                return Ok(());
            }
            "refresh" => self.dashboard.refresh().await,
            "new" => {
                self.dashboard.set_new_list_title(args);
                self.dashboard.create_list().await
            }
            "open" => {
                let id = resolve_list(&self.dashboard.view(), args)?.id.clone();
                self.dashboard.toggle_expanded(&id);
                return Ok(());
            }
            "edit" => return self.begin_edit(args),
            "delete" => {
                let id = resolve_list(&self.dashboard.view(), args)?.id.clone();
                self.dashboard.delete_list(&id).await
            }
            "add" => {
                let (list, text) = args.split_once(char::is_whitespace).unwrap_or((args, ""));
                let id = resolve_list(&self.dashboard.view(), list)?.id.clone();
                self.dashboard.set_new_todo_text(text.trim_start());
                self.dashboard.add_todo(&id).await
            }
            "toggle" => {
                let (list_id, todo_id) = self.todo_arg(args)?;
                self.dashboard.toggle_todo(&list_id, &todo_id).await
            }
            "remove" => {
                let (list_id, todo_id) = self.todo_arg(args)?;
                self.dashboard.delete_todo(&list_id, &todo_id).await
            }
            other => return Err(anyhow!("unhandled command: {other}")),
        };

        self.report(outcome)
    }

    fn todo_arg(&self, args: &str) -> anyhow::Result<(ListId, TodoId)> {
        let (list, todo) =
            split_todo_ref(args).ok_or_else(|| anyhow!("expected <list>.<todo>, got: {args}"))?;
        resolve_todo_ref(&self.dashboard.view(), list, todo)
    }

    fn begin_edit(&mut self, args: &str) -> anyhow::Result<()> {
        if let Some((list, todo)) = split_todo_ref(args) {
            let (list_id, todo_id) = resolve_todo_ref(&self.dashboard.view(), list, todo)?;
            if !self.dashboard.begin_todo_edit(&list_id, &todo_id) {
                return Err(anyhow!("completed todos cannot be edited"));
            }
        } else {
            let id = resolve_list(&self.dashboard.view(), args)?.id.clone();
            self.dashboard.begin_list_edit(&id);
        }
        writeln!(self.out, "Enter the new text, or `.cancel`.")?;
        Ok(())
    }

    async fn finish_edit(&mut self, line: &str) -> anyhow::Result<()> {
        let editing_list = self.dashboard.list_edit().is_some();

        if line.trim() == ".cancel" {
            if editing_list {
                self.dashboard.cancel_list_edit();
            } else {
                self.dashboard.cancel_todo_edit();
            }
            return Ok(());
        }

        let outcome = if editing_list {
            self.dashboard.set_list_draft(line);
            self.dashboard.submit_list_edit().await
        } else {
            self.dashboard.set_todo_draft(line);
            self.dashboard.submit_todo_edit().await
        };

        if let Outcome::Rejected(_) = outcome {
            writeln!(self.out, "Still editing. Enter the new text, or `.cancel`.")?;
            return Ok(());
        }
        self.report(outcome)
    }

    fn report(&mut self, outcome: Outcome) -> anyhow::Result<()> {
        match outcome {
            Outcome::Done | Outcome::Skipped | Outcome::Failed => {}
            Outcome::Declined => writeln!(self.out, "Cancelled.")?,
            Outcome::Rejected(ValidationError::EmptyTitle) => {
                writeln!(self.out, "A list needs a title.")?
            }
            Outcome::Rejected(ValidationError::EmptyText) => {
                writeln!(self.out, "A todo needs some text.")?
            }
        }
        Ok(())
    }

    fn render(&mut self) -> anyhow::Result<()> {
        writeln!(self.out)?;
        self.renderer
            .write_dashboard(&mut self.out, &self.dashboard.view())
    }
}
