#![cfg(feature = "tui")]

use crate::app::Backend;
use crate::auth::Session;
use crate::conversation::{Conversation, Phase, PipelineEvent};
use crate::error::ChatError;
use crate::gate::{Gate, SignInForm};
use anyhow::Context;
use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use std::io;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Username,
    Password,
}

struct TuiState {
    backend: Backend,
    gate: Gate,
    focus: Field,
    pending_sign_in: Option<oneshot::Receiver<anyhow::Result<Session>>>,
    active: Option<mpsc::UnboundedReceiver<PipelineEvent>>,
}

pub async fn run_tui(backend: Backend) -> anyhow::Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("enter alt screen")?;

    let term_backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(term_backend).context("create terminal")?;

    let (ev_tx, mut ev_rx) = mpsc::unbounded_channel::<Event>();
    std::thread::spawn(move || {
        while let Ok(ev) = crossterm::event::read() {
            if ev_tx.send(ev).is_err() {
                break;
            }
        }
    });

    let mut state = TuiState {
        backend,
        gate: Gate::default(),
        focus: Field::Username,
        pending_sign_in: None,
        active: None,
    };

    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(33));

    let res = loop {
        let pending_sign_in = &mut state.pending_sign_in;
        let active = &mut state.active;

        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = terminal.draw(|f| draw(f, &state)) {
                    break Err(anyhow::Error::new(e).context("draw frame"));
                }
            }
            Some(ev) = ev_rx.recv() => {
                if let Event::Key(key) = ev {
                    if key.kind == KeyEventKind::Press && state.handle_key(key) {
                        break Ok(());
                    }
                }
            }
            Some(result) = async move {
                match pending_sign_in {
                    Some(rx) => Some(rx.await.unwrap_or_else(|_| Err(anyhow::anyhow!("sign-in task ended")))),
                    None => None,
                }
            } => {
                state.pending_sign_in = None;
                match result {
                    Ok(session) => state.gate.signed_in(session),
                    Err(e) => state.gate.sign_in_failed(format!("{e:#}")),
                }
            }
            Some(event) = async move {
                match active {
                    Some(rx) => Some(rx.recv().await.unwrap_or_else(|| {
                        PipelineEvent::Failed(ChatError::transport("submission ended unexpectedly"))
                    })),
                    None => None,
                }
            } => {
                state.apply_pipeline_event(event);
            }
        }
    };

    // Leaving the view abandons whatever is still streaming.
    state.gate.sign_out();

    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();

    res
}

impl TuiState {
    /// Returns true when the user asked to quit.
    fn handle_key(&mut self, key: KeyEvent) -> bool {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        if (ctrl && key.code == KeyCode::Char('c')) || key.code == KeyCode::Esc {
            return true;
        }

        if self.gate.is_signed_in() {
            self.handle_chat_key(key);
        } else {
            self.handle_sign_in_key(key);
        }
        false
    }

    fn handle_sign_in_key(&mut self, key: KeyEvent) {
        if self.pending_sign_in.is_some() {
            return;
        }
        let Gate::SignedOut { form, .. } = &mut self.gate else {
            return;
        };

        let field = match self.focus {
            Field::Username => &mut form.username,
            Field::Password => &mut form.password,
        };

        match key.code {
            KeyCode::Tab | KeyCode::BackTab | KeyCode::Up | KeyCode::Down => {
                self.focus = match self.focus {
                    Field::Username => Field::Password,
                    Field::Password => Field::Username,
                };
            }
            KeyCode::Char(c) => field.push(c),
            KeyCode::Backspace => {
                field.pop();
            }
            KeyCode::Enter => {
                if !form.is_complete() {
                    self.focus = if form.username.trim().is_empty() {
                        Field::Username
                    } else {
                        Field::Password
                    };
                    return;
                }
                let SignInForm { username, password } = form.clone();
                let identity = self.backend.identity.clone();
                let (tx, rx) = oneshot::channel();
                tokio::spawn(async move {
                    let _ = tx.send(identity.sign_in(username.trim().to_string(), password).await);
                });
                self.pending_sign_in = Some(rx);
            }
            _ => {}
        }
    }

    fn handle_chat_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('o') {
            self.gate.sign_out();
            self.active = None;
            self.focus = Field::Username;
            return;
        }

        let Gate::SignedIn { session, conversation } = &mut self.gate else {
            return;
        };

        match key.code {
            KeyCode::Enter if key.modifiers.contains(KeyModifiers::ALT) => {
                conversation.edit_draft(|d| d.push('\n'));
            }
            KeyCode::Enter => {
                if let Some(submission) = conversation.submit() {
                    self.active = Some(self.backend.pipeline.spawn(session.clone(), submission));
                }
            }
            KeyCode::Char(c) => {
                conversation.edit_draft(|d| d.push(c));
            }
            KeyCode::Backspace => {
                conversation.edit_draft(|d| {
                    d.pop();
                });
            }
            _ => {}
        }
    }

    fn apply_pipeline_event(&mut self, event: PipelineEvent) {
        match self.gate.conversation_mut() {
            Some(conv) => {
                conv.apply(event);
                if !conv.is_loading() {
                    self.active = None;
                }
            }
            None => self.active = None,
        }
    }
}

fn draw(f: &mut Frame, state: &TuiState) {
    match &state.gate {
        Gate::SignedOut { form, error } => {
            draw_sign_in(f, form, error.as_deref(), state.focus, state.pending_sign_in.is_some())
        }
        Gate::SignedIn { session, conversation } => draw_chat(f, &session.username, conversation),
    }
}

fn draw_sign_in(f: &mut Frame, form: &SignInForm, error: Option<&str>, focus: Field, pending: bool) {
    let area = centered(f.area(), 60, 9);
    let label = |field: Field, name: &str| {
        let style = if field == focus {
            Style::default().add_modifier(Modifier::BOLD)
        } else {
            Style::default()
        };
        Line::styled(name.to_string(), style)
    };

    let mut text = Text::default();
    text.lines.push(label(Field::Username, &format!("Username: {}", form.username)));
    text.lines.push(label(Field::Password, &format!("Password: {}", "*".repeat(form.password.chars().count()))));
    text.lines.push(Line::from(""));
    if pending {
        text.lines.push(Line::from("Signing in..."));
    } else if let Some(err) = error {
        text.lines.push(Line::styled(err.to_string(), Style::default().fg(Color::Red)));
    } else {
        text.lines.push(Line::from("Tab switches field, Enter signs in, Esc quits"));
    }

    let w = Paragraph::new(text)
        .block(Block::default().borders(Borders::ALL).title("Sign in"))
        .wrap(Wrap { trim: false });
    f.render_widget(w, area);

    if !pending {
        let (row, len) = match focus {
            Field::Username => (0, "Username: ".len() + form.username.chars().count()),
            Field::Password => (1, "Password: ".len() + form.password.chars().count()),
        };
        let x = inside(area.x, len);
        f.set_cursor_position((
            x.min(area.x.saturating_add(area.width.saturating_sub(2))),
            inside(area.y, row),
        ));
    }
}

fn draw_chat(f: &mut Frame, username: &str, conv: &Conversation) {
    let mut constraints = vec![Constraint::Length(3), Constraint::Length(7)];
    if conv.error().is_some() {
        constraints.push(Constraint::Length(4));
    }
    constraints.push(Constraint::Min(1));

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(f.area());

    let header = Paragraph::new(Line::styled(
        format!("Welcome {username}"),
        Style::default().add_modifier(Modifier::BOLD),
    ))
    .block(Block::default().borders(Borders::ALL).title("Ctrl+O sign out, Esc quit"));
    f.render_widget(header, chunks[0]);

    let status = match conv.phase() {
        Phase::Submitting => "Processing...",
        _ if conv.can_submit() => "Enter: Send, Alt+Enter: newline",
        Phase::Failed => "Edit the message to try again",
        Phase::Idle => "Enter a message...",
    };
    let input_style = if conv.is_loading() {
        Style::default().add_modifier(Modifier::DIM)
    } else {
        Style::default()
    };
    let input = Paragraph::new(conv.draft().to_string())
        .style(input_style)
        .block(Block::default().borders(Borders::ALL).title(status))
        .wrap(Wrap { trim: false });
    f.render_widget(input, chunks[1]);

    let mut next = 2;
    if let Some(err) = conv.error() {
        let w = Paragraph::new(err.to_string())
            .style(Style::default().fg(Color::Red))
            .block(Block::default().borders(Borders::ALL).title("error"))
            .wrap(Wrap { trim: false });
        f.render_widget(w, chunks[next]);
        next += 1;
    }

    if !conv.response().is_empty() {
        let w = Paragraph::new(conv.response().to_string())
            .block(Block::default().borders(Borders::ALL).title("response"))
            .wrap(Wrap { trim: false });
        f.render_widget(w, chunks[next]);
    }

    if !conv.is_loading() {
        let area = chunks[1];
        let last = conv.draft().rsplit('\n').next().unwrap_or("");
        let x = inside(area.x, last.chars().count());
        let y = inside(area.y, conv.draft().matches('\n').count());
        f.set_cursor_position((
            x.min(area.x.saturating_add(area.width.saturating_sub(2))),
            y.min(area.y.saturating_add(area.height.saturating_sub(2))),
        ));
    }
}

/// Screen coordinate `offset` cells past a bordered block's edge at `edge`.
fn inside(edge: u16, offset: usize) -> u16 {
    edge.saturating_add(1)
        .saturating_add(u16::try_from(offset).unwrap_or(u16::MAX))
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let w = width.min(area.width);
    let h = height.min(area.height);
    Rect {
        x: area.x + (area.width - w) / 2,
        y: area.y + (area.height - h) / 2,
        width: w,
        height: h,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_offset_saturates_on_huge_input() {
        assert_eq!(inside(4, 10), 15);
        assert_eq!(inside(10, 70_000), u16::MAX);
        assert_eq!(inside(u16::MAX - 1, 5), u16::MAX);
    }
}
