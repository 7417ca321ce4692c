//! Line commands understood by the terminal client.
//!
//! Plain lines are sent as messages. Entries are addressed by the index
//! printed next to them.

pub const HELP: &str = "\
commands:
  <text>                          send a message
  /show                           redraw the timeline
  /history                        reload the current conversation
  /open <conversation>            open an existing conversation
  /chats                          list conversations
  /rename <title>                 rename the current conversation
  /delete <conversation>          delete a conversation
  /new                            start a new conversation
  /select <entry> <option>        choose a single-select option
  /pick <entry> <option>          toggle a skill pick
  /decide <entry> [on|off]        let the system decide the skills
  /answer <entry> <batch> <question> <answer>
                                  answer a question in a survey batch
  /submit <entry> [batch]         submit a survey (or one batch)
  /help                           show this help
  /quit                           exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    Show,
    History,
    Open(String),
    Chats,
    Rename(String),
    Delete(String),
    New,
    Select {
        entry: usize,
        option: String,
    },
    Pick {
        entry: usize,
        option: String,
    },
    Decide {
        entry: usize,
        on: bool,
    },
    Answer {
        entry: usize,
        batch: String,
        question: String,
        answer: String,
    },
    Submit {
        entry: usize,
        batch: Option<String>,
    },
    Help,
    Quit,
}

/// Parse one input line. `Ok(None)` for blank lines.
pub fn parse(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Send(line.to_string())));
    };

    let mut words = rest.split_whitespace();
    let name = words.next().unwrap_or_default();
    let args: Vec<&str> = words.collect();

    let command = match (name, args.as_slice()) {
        ("show", []) => Command::Show,
        ("history", []) => Command::History,
        ("open", [id]) => Command::Open(id.to_string()),
        ("chats", []) => Command::Chats,
        ("rename", title) if !title.is_empty() => Command::Rename(title.join(" ")),
        ("delete", [id]) => Command::Delete(id.to_string()),
        ("new", []) => Command::New,
        ("select", [entry, option]) => Command::Select {
            entry: index(entry)?,
            option: option.to_string(),
        },
        ("pick", [entry, option]) => Command::Pick {
            entry: index(entry)?,
            option: option.to_string(),
        },
        ("decide", [entry]) => Command::Decide {
            entry: index(entry)?,
            on: true,
        },
        ("decide", [entry, toggle]) => Command::Decide {
            entry: index(entry)?,
            on: switch(toggle)?,
        },
        ("answer", [entry, batch, question, answer]) => Command::Answer {
            entry: index(entry)?,
            batch: batch.to_string(),
            question: question.to_string(),
            answer: answer.to_string(),
        },
        ("submit", [entry]) => Command::Submit {
            entry: index(entry)?,
            batch: None,
        },
        ("submit", [entry, batch]) => Command::Submit {
            entry: index(entry)?,
            batch: Some(batch.to_string()),
        },
        ("help", _) => Command::Help,
        ("quit" | "exit", _) => Command::Quit,
        _ => return Err(format!("unrecognized command: /{rest} (try /help)")),
    };
    Ok(Some(command))
}

fn index(raw: &str) -> Result<usize, String> {
    raw.trim_matches(|c| c == '[' || c == ']')
        .parse()
        .map_err(|_| format!("not an entry index: {raw}"))
}

fn switch(raw: &str) -> Result<bool, String> {
    match raw {
        "on" | "yes" | "true" => Ok(true),
        "off" | "no" | "false" => Ok(false),
        other => Err(format!("expected on or off, got {other}")),
    }
}
