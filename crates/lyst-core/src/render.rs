use std::io::{self, IsTerminal, Write};

use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::dashboard::{DashboardView, ListRow, TodoRow};

const TITLE: &str = "Lyst App: Todos Simplified";

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> Self {
        Self {
            color: color_enabled(cfg, io::stdout().is_terminal()),
        }
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    #[tracing::instrument(skip(self, view))]
    pub fn print_dashboard(&self, view: &DashboardView) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_dashboard(&mut out, view)
    }

    pub fn write_dashboard<W: Write>(&self, mut out: W, view: &DashboardView) -> anyhow::Result<()> {
        writeln!(out, "{}", self.paint(TITLE, "1"))?;

        let Some(user) = view.user.as_ref() else {
            writeln!(out, "Please sign in to view and create lists.")?;
            writeln!(out, "Run `login` to sign in with Google.")?;
            return Ok(());
        };

        writeln!(out, "Signed in as {}", user.label())?;
        if view.lists.is_empty() {
            writeln!(out, "No lists yet. Create one with `new <title>`.")?;
            return Ok(());
        }

        let number_width = view
            .lists
            .iter()
            .map(|row| row.number.to_string().len())
            .max()
            .unwrap_or(1);

        let title_width = view
            .lists
            .iter()
            .map(|row| UnicodeWidthStr::width(row.title.as_str()))
            .max()
            .unwrap_or(0);

        for row in &view.lists {
            self.write_list(&mut out, row, view, number_width, title_width)?;
        }

        Ok(())
    }

    fn write_list<W: Write>(
        &self,
        out: &mut W,
        row: &ListRow,
        view: &DashboardView,
        number_width: usize,
        title_width: usize,
    ) -> anyhow::Result<()> {
        let marker = if row.expanded { "▼" } else { "▶" };
        let number = format!("{:>number_width$}", row.number);

        let title = match view.list_edit.as_ref() {
            Some(edit) if row.editing => format!("[editing: {}]", edit.draft),
            _ => {
                let padding = title_width.saturating_sub(UnicodeWidthStr::width(row.title.as_str()));
                format!("{}{} ({} items)", row.title, " ".repeat(padding), row.item_count)
            }
        };

        writeln!(
            out,
            "{} {} {}",
            self.paint(&number, "33"),
            marker,
            self.paint(&title, "1;34")
        )?;

        if !row.expanded {
            return Ok(());
        }

        let indent = " ".repeat(number_width + 3);
        if row.incomplete.is_empty() && row.completed.is_empty() {
            writeln!(out, "{indent}No todos in this list yet.")?;
            return Ok(());
        }

        let todo_width = row
            .incomplete
            .iter()
            .chain(row.completed.iter())
            .map(|todo| todo.number.to_string().len())
            .max()
            .unwrap_or(1);

        for todo in &row.incomplete {
            let text = match view.todo_edit.as_ref() {
                Some(edit) if todo.editing => format!("[editing: {}]", edit.draft),
                _ => todo.todo.text.clone(),
            };
            writeln!(
                out,
                "{indent}{} [ ] {}",
                self.number_cell(todo, todo_width),
                text
            )?;
        }

        if !row.completed.is_empty() {
            writeln!(out, "{indent}{}", self.paint("Completed", "2;4"))?;
            for todo in &row.completed {
                let line = format!(
                    "{} [x] {}",
                    self.number_cell(todo, todo_width),
                    todo.todo.text
                );
                writeln!(out, "{indent}{}", self.paint(&line, "2;9"))?;
            }
        }

        Ok(())
    }

    fn number_cell(&self, todo: &TodoRow, width: usize) -> String {
        format!("{:>width$}.", todo.number)
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

/// Colour is on unless `color` is set to a false value, and only on a tty.
fn color_enabled(cfg: &Config, is_terminal: bool) -> bool {
    cfg.get_bool("color").unwrap_or(true) && is_terminal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::{ListEdit, ListRow, TodoRow};
    use crate::model::{ListId, Todo, TodoId};
    use crate::session::User;

    fn todo_row(number: usize, text: &str, completed: bool) -> TodoRow {
        TodoRow {
            number,
            todo: Todo {
                id: TodoId::new(format!("t{number}")),
                text: text.to_string(),
                completed,
            },
            editing: false,
        }
    }

    fn view(lists: Vec<ListRow>) -> DashboardView {
        DashboardView {
            user: Some(User {
                uid: "u1".to_string(),
                email: Some("ada@example.com".to_string()),
                display_name: None,
            }),
            new_list_title: String::new(),
            new_todo_text: String::new(),
            list_edit: None,
            todo_edit: None,
            lists,
        }
    }

    fn render(view: &DashboardView) -> String {
        let mut buf = Vec::new();
        Renderer::plain()
            .write_dashboard(&mut buf, view)
            .expect("render");
        String::from_utf8(buf).expect("utf8")
    }

    #[test]
    fn signed_out_shows_gate() {
        let mut v = view(vec![]);
        v.user = None;
        let text = render(&v);
        assert!(text.contains("Please sign in to view and create lists."));
    }

    #[test]
    fn expanded_list_groups_completed_todos_last() {
        let row = ListRow {
            number: 1,
            id: ListId::new("l1"),
            title: "Groceries".to_string(),
            item_count: 2,
            expanded: true,
            editing: false,
            incomplete: vec![todo_row(1, "milk", false)],
            completed: vec![todo_row(2, "eggs", true)],
        };
        let text = render(&view(vec![row]));

        assert!(text.contains("1 ▼ Groceries (2 items)"));
        let milk = text.find("[ ] milk").expect("milk");
        let heading = text.find("Completed").expect("heading");
        let eggs = text.find("[x] eggs").expect("eggs");
        assert!(milk < heading && heading < eggs);
    }

    #[test]
    fn collapsed_and_empty_lists() {
        let collapsed = ListRow {
            number: 1,
            id: ListId::new("l1"),
            title: "Later".to_string(),
            item_count: 1,
            expanded: false,
            editing: false,
            incomplete: vec![todo_row(1, "hidden", false)],
            completed: vec![],
        };
        let empty = ListRow {
            number: 2,
            id: ListId::new("l2"),
            title: "Empty".to_string(),
            item_count: 0,
            expanded: true,
            editing: false,
            incomplete: vec![],
            completed: vec![],
        };
        let text = render(&view(vec![collapsed, empty]));

        assert!(text.contains("1 ▶ Later (1 items)"));
        assert!(!text.contains("hidden"));
        assert!(text.contains("No todos in this list yet."));
    }

    #[test]
    fn editing_row_shows_draft() {
        let row = ListRow {
            number: 1,
            id: ListId::new("l1"),
            title: "Old".to_string(),
            item_count: 0,
            expanded: false,
            editing: true,
            incomplete: vec![],
            completed: vec![],
        };
        let mut v = view(vec![row]);
        v.list_edit = Some(ListEdit {
            list_id: ListId::new("l1"),
            draft: "New name".to_string(),
        });

        assert!(render(&v).contains("[editing: New name]"));
    }

    #[test]
    fn color_setting_uses_config_booleans() {
        let mut cfg = Config::defaults();
        cfg.apply_overrides([("color".to_string(), "y".to_string())]);
        assert!(color_enabled(&cfg, true));
        assert!(!color_enabled(&cfg, false));

        cfg.apply_overrides([("rc.color".to_string(), "off".to_string())]);
        assert!(!color_enabled(&cfg, true));
    }
}
