use anyhow::{anyhow, bail, Result};
use sgf_core::SourceId;
use sgf_sync::Event;

pub const HELP: &str = "\
commands:
  search <text>      filter products by name (empty clears)
  category <name>    exact category (empty clears)
  company <name>     exact company (empty clears)
  toggle <source>    include/exclude coacel or convivir
  clear              reset search, category and company
  retry              reload both catalogs
  show [n]           print the dashboard, optionally limited to n rows
  json               print the dashboard as JSON
  help               this text
  quit               leave";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Event(Event),
    Retry,
    Show(Option<usize>),
    Json,
    Help,
    Quit,
}

pub fn parse_line(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim().to_string();

    let command = match word.to_ascii_lowercase().as_str() {
        "search" | "s" => Command::Event(Event::SearchChanged(rest)),
        "category" | "cat" => Command::Event(Event::CategorySelected(rest)),
        "company" | "co" => Command::Event(Event::CompanySelected(rest)),
        "toggle" | "t" => {
            let source = SourceId::from_slug(&rest)
                .ok_or_else(|| anyhow!("unknown source `{rest}` (expected coacel or convivir)"))?;
            Command::Event(Event::SourceToggled(source))
        }
        "clear" => Command::Event(Event::FiltersCleared),
        "retry" | "reload" => Command::Retry,
        "show" => {
            if rest.is_empty() {
                Command::Show(None)
            } else {
                Command::Show(Some(rest.parse().map_err(|_| anyhow!("invalid row limit `{rest}`"))?))
            }
        }
        "json" => Command::Json,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => bail!("unknown command `{other}`; type `help`"),
    };
    Ok(Some(command))
}
