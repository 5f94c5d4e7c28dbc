use anyhow::anyhow;
use tracing::{debug, info, instrument};

use crate::cli::Command;
use crate::dashboard::{Dashboard, DashboardView, ListRow, Outcome};
use crate::model::{ListId, TodoId};
use crate::render::Renderer;

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "help", "login", "logout", "whoami", "refresh", "new", "open", "edit", "delete", "add",
        "toggle", "remove", "quit",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

/// Resolves a list reference: the 1-based row number shown on the
/// dashboard, or a list id.
pub fn resolve_list<'v>(view: &'v DashboardView, token: &str) -> anyhow::Result<&'v ListRow> {
    let token = token.trim();
    if let Ok(number) = token.parse::<usize>()
        && let Some(row) = view.lists.iter().find(|row| row.number == number)
    {
        return Ok(row);
    }

    view.lists
        .iter()
        .find(|row| row.id.as_str() == token)
        .ok_or_else(|| anyhow!("no such list: {token}"))
}

/// Resolves a todo reference within `row`: its display number or its id.
pub fn resolve_todo(row: &ListRow, token: &str) -> anyhow::Result<TodoId> {
    let token = token.trim();
    if let Ok(number) = token.parse::<usize>()
        && let Some(todo) = row.todo_by_number(number)
    {
        return Ok(todo.todo.id.clone());
    }

    row.incomplete
        .iter()
        .chain(row.completed.iter())
        .find(|todo| todo.todo.id.as_str() == token)
        .map(|todo| todo.todo.id.clone())
        .ok_or_else(|| anyhow!("no such todo in \"{}\": {token}", row.title))
}

/// Splits `N.M` into list and todo references.
pub fn split_todo_ref(token: &str) -> Option<(&str, &str)> {
    let (list, todo) = token.split_once('.')?;
    if list.is_empty() || todo.is_empty() {
        return None;
    }
    Some((list, todo))
}

pub fn resolve_todo_ref(view: &DashboardView, list: &str, todo: &str) -> anyhow::Result<(ListId, TodoId)> {
    let row = resolve_list(view, list)?;
    let todo_id = resolve_todo(row, todo)?;
    Ok((row.id.clone(), todo_id))
}

/// Turns an action outcome into a command result. Alerts have already been
/// shown by the time this runs.
pub fn finish(outcome: Outcome) -> anyhow::Result<()> {
    match outcome {
        Outcome::Done => Ok(()),
        Outcome::Rejected(err) => Err(err.into()),
        Outcome::Declined => {
            println!("Cancelled.");
            Ok(())
        }
        Outcome::Skipped => Err(anyhow!("nothing to do")),
        Outcome::Failed => Err(anyhow!("request failed")),
    }
}

fn require_user(dashboard: &Dashboard) -> anyhow::Result<()> {
    if dashboard.user().is_none() {
        return Err(anyhow!("not signed in; run `lyst login` first"));
    }
    Ok(())
}

/// Runs a one-shot subcommand against a started dashboard. `Shell` is
/// handled by the caller.
#[instrument(skip(dashboard, renderer))]
pub async fn dispatch(
    dashboard: &mut Dashboard,
    renderer: &Renderer,
    command: Command,
) -> anyhow::Result<()> {
    debug!(?command, "dispatching command");

    match command {
        Command::Login => cmd_login(dashboard).await,
        Command::Logout => cmd_logout(dashboard).await,
        Command::Whoami => cmd_whoami(dashboard),
        Command::Lists => cmd_lists(dashboard, renderer),
        Command::Create { title } => {
            require_user(dashboard)?;
            dashboard.set_new_list_title(title);
            finish(dashboard.create_list().await)
        }
        Command::Rename { list, title } => {
            require_user(dashboard)?;
            let id = resolve_list(&dashboard.view(), &list)?.id.clone();
            dashboard.begin_list_edit(&id);
            dashboard.set_list_draft(title);
            let outcome = dashboard.submit_list_edit().await;
            dashboard.cancel_list_edit();
            finish(outcome)
        }
        Command::Delete { list, .. } => {
            require_user(dashboard)?;
            let id = resolve_list(&dashboard.view(), &list)?.id.clone();
            finish(dashboard.delete_list(&id).await)
        }
        Command::Add { list, text } => {
            require_user(dashboard)?;
            let id = resolve_list(&dashboard.view(), &list)?.id.clone();
            dashboard.set_new_todo_text(text);
            finish(dashboard.add_todo(&id).await)
        }
        Command::Toggle { list, todo } => {
            require_user(dashboard)?;
            let (list_id, todo_id) = resolve_todo_ref(&dashboard.view(), &list, &todo)?;
            finish(dashboard.toggle_todo(&list_id, &todo_id).await)
        }
        Command::Edit { list, todo, text } => {
            require_user(dashboard)?;
            let (list_id, todo_id) = resolve_todo_ref(&dashboard.view(), &list, &todo)?;
            if !dashboard.begin_todo_edit(&list_id, &todo_id) {
                return Err(anyhow!("completed todos cannot be edited"));
            }
            dashboard.set_todo_draft(text);
            let outcome = dashboard.submit_todo_edit().await;
            dashboard.cancel_todo_edit();
            finish(outcome)
        }
        Command::Remove { list, todo } => {
            require_user(dashboard)?;
            let (list_id, todo_id) = resolve_todo_ref(&dashboard.view(), &list, &todo)?;
            finish(dashboard.delete_todo(&list_id, &todo_id).await)
        }
        Command::Shell => Err(anyhow!("shell is not a one-shot command")),
    }
}

async fn cmd_login(dashboard: &mut Dashboard) -> anyhow::Result<()> {
    if let Some(user) = dashboard.user() {
        println!("Already signed in as {}", user.label());
        return Ok(());
    }

    finish(dashboard.sign_in().await)?;
    match dashboard.user() {
        Some(user) => {
            info!(uid = %user.uid, "signed in");
            println!("Signed in as {}", user.label());
            Ok(())
        }
        None => Err(anyhow!("sign-in did not complete")),
    }
}

async fn cmd_logout(dashboard: &mut Dashboard) -> anyhow::Result<()> {
    if dashboard.user().is_none() {
        println!("Not signed in.");
        return Ok(());
    }
    finish(dashboard.sign_out().await)?;
    println!("Signed out.");
    Ok(())
}

fn cmd_whoami(dashboard: &Dashboard) -> anyhow::Result<()> {
    match dashboard.user() {
        Some(user) => {
            println!("{}", user.label());
            if let Some(email) = user.email.as_deref()
                && email != user.label()
            {
                println!("{email}");
            }
            println!("uid: {}", user.uid);
        }
        None => println!("Not signed in."),
    }
    Ok(())
}

fn cmd_lists(dashboard: &mut Dashboard, renderer: &Renderer) -> anyhow::Result<()> {
    let ids: Vec<ListId> = dashboard.lists().iter().map(|l| l.id.clone()).collect();
    for id in &ids {
        if !dashboard.is_expanded(id) {
            dashboard.toggle_expanded(id);
        }
    }
    renderer.print_dashboard(&dashboard.view())
}
