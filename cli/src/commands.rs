// Slash commands read from stdin.

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Open { peer: String },
    Close,
    Msg { peer: String, body: String },
    /// Plain text sent to the open chat.
    Say { body: String },
    Pay { peer: String, amount: f64 },
    Settle { peer: String, request_id: String },
    Who,
    Contacts,
    Help,
    Quit,
}

pub const HELP: &str = "\
/open <peer>                 open a chat
/close                       close the open chat
/msg <peer> <text>           send a message
/pay <peer> <amount>         request money, e.g. /pay bob 12.50
/settle <peer> <request_id>  pay a request you received
/who                         list online peers
/contacts                    ranked contact list
/quit                        exit
text without a slash goes to the open chat";

fn usage(cmd: &str) -> String {
    let line = HELP
        .lines()
        .find(|l| l.starts_with(cmd))
        .unwrap_or(cmd)
        .trim_end();
    format!("usage: {line}")
}

pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if !line.starts_with('/') {
        return Ok(Some(Command::Say {
            body: line.to_string(),
        }));
    }

    let mut parts = line.splitn(3, char::is_whitespace);
    let cmd = parts.next().unwrap_or_default();
    let first = parts.next().map(str::trim).filter(|s| !s.is_empty());
    let rest = parts.next().map(str::trim).filter(|s| !s.is_empty());

    let command = match cmd {
        "/open" => Command::Open {
            peer: first.ok_or_else(|| usage("/open"))?.to_string(),
        },
        "/close" => Command::Close,
        "/msg" => match (first, rest) {
            (Some(peer), Some(body)) => Command::Msg {
                peer: peer.to_string(),
                body: body.to_string(),
            },
            _ => return Err(usage("/msg")),
        },
        "/pay" => match (first, rest.and_then(|a| a.parse::<f64>().ok())) {
            (Some(peer), Some(amount)) => Command::Pay {
                peer: peer.to_string(),
                amount,
            },
            _ => return Err(usage("/pay")),
        },
        "/settle" => match (first, rest) {
            (Some(peer), Some(request_id)) => Command::Settle {
                peer: peer.to_string(),
                request_id: request_id.to_string(),
            },
            _ => return Err(usage("/settle")),
        },
        "/who" => Command::Who,
        "/contacts" => Command::Contacts,
        "/help" => Command::Help,
        "/quit" | "/exit" => Command::Quit,
        other => return Err(format!("unknown command {other}; try /help")),
    };
    Ok(Some(command))
}
