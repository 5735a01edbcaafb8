//! Operator console line protocol.

use anyhow::{anyhow, Result};

use crate::coords::Point;

pub const HELP: &str = "\
commands:
  cameras                      list the roster
  select <cam> | deselect      switch the active camera
  snapshot | close             request / close the snapshot view
  image <natural_w> <natural_h>  declare the snapshot loaded
  zone <1-5> | line <name>     arm a zone or line
  down <x> <y> | move <x> <y> | up | leave   pointer events (display px)
  discard                      drop the armed or in-progress shape
  delete-zone <id> | delete-line <name>
  reset-zone <id> | reset-line <name>
  counts                       show counts for the active camera
  pick | toggle <src> | confirm | cancel   start_pipeline picker
  help | quit";

#[derive(Clone, Debug, PartialEq)]
pub enum OperatorInput {
    Cameras,
    Select(String),
    Deselect,
    Snapshot,
    Close,
    ImageLoaded { width: u32, height: u32 },
    ArmZone(u8),
    ArmLine(String),
    Down(Point),
    Move(Point),
    Up,
    Leave,
    Discard,
    DeleteZone(u8),
    DeleteLine(String),
    ResetZone(u8),
    ResetLine(String),
    Counts,
    Pick,
    Toggle(String),
    Confirm,
    Cancel,
    Help,
    Quit,
}

/// Parse one line of operator input. Blank lines yield `None`.
pub fn parse_input(line: &str) -> Result<Option<OperatorInput>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };
    let input = match verb.to_ascii_lowercase().as_str() {
        "cameras" => OperatorInput::Cameras,
        "select" => OperatorInput::Select(required(verb, rest)?.to_string()),
        "deselect" => OperatorInput::Deselect,
        "snapshot" => OperatorInput::Snapshot,
        "close" => OperatorInput::Close,
        "image" => {
            let [width, height] = numbers::<u32>(verb, rest)?;
            OperatorInput::ImageLoaded { width, height }
        }
        "zone" => OperatorInput::ArmZone(zone_id(verb, rest)?),
        "line" => OperatorInput::ArmLine(required(verb, rest)?.to_string()),
        "down" => OperatorInput::Down(point(verb, rest)?),
        "move" => OperatorInput::Move(point(verb, rest)?),
        "up" => OperatorInput::Up,
        "leave" => OperatorInput::Leave,
        "discard" => OperatorInput::Discard,
        "delete-zone" => OperatorInput::DeleteZone(zone_id(verb, rest)?),
        "delete-line" => OperatorInput::DeleteLine(required(verb, rest)?.to_string()),
        "reset-zone" => OperatorInput::ResetZone(zone_id(verb, rest)?),
        "reset-line" => OperatorInput::ResetLine(required(verb, rest)?.to_string()),
        "counts" => OperatorInput::Counts,
        "pick" => OperatorInput::Pick,
        "toggle" => OperatorInput::Toggle(required(verb, rest)?.to_string()),
        "confirm" => OperatorInput::Confirm,
        "cancel" => OperatorInput::Cancel,
        "help" | "?" => OperatorInput::Help,
        "quit" | "exit" => OperatorInput::Quit,
        other => return Err(anyhow!("unknown command '{}' (try 'help')", other)),
    };
    Ok(Some(input))
}

fn required<'a>(verb: &str, rest: &'a str) -> Result<&'a str> {
    if rest.is_empty() {
        return Err(anyhow!("'{}' needs an argument", verb));
    }
    Ok(rest)
}

fn zone_id(verb: &str, rest: &str) -> Result<u8> {
    required(verb, rest)?
        .parse()
        .map_err(|_| anyhow!("'{}' expects a zone id, got '{}'", verb, rest))
}

fn numbers<T: std::str::FromStr>(verb: &str, rest: &str) -> Result<[T; 2]> {
    let parts: Vec<&str> = rest.split_whitespace().collect();
    let [a, b] = parts.as_slice() else {
        return Err(anyhow!("'{}' expects two numbers", verb));
    };
    let parse = |s: &str| {
        s.parse::<T>()
            .map_err(|_| anyhow!("'{}': '{}' is not a number", verb, s))
    };
    Ok([parse(*a)?, parse(*b)?])
}

fn point(verb: &str, rest: &str) -> Result<Point> {
    let [x, y] = numbers::<f64>(verb, rest)?;
    let p = Point::new(x, y);
    if !p.is_finite() {
        return Err(anyhow!("'{}' expects finite coordinates", verb));
    }
    Ok(p)
}
