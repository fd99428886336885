/// Interactive commands read from stdin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Refresh,
    Clear,
    Count,
    Status,
    Help,
    Quit,
}

pub const HELP: &str = "commands: start | stop | refresh | clear | count | status | help | quit";

pub fn parse(line: &str) -> Option<Command> {
    let cmd = match line.trim().to_ascii_lowercase().as_str() {
        "start" | "on" => Command::Start,
        "stop" | "off" => Command::Stop,
        "refresh" | "r" => Command::Refresh,
        "clear" => Command::Clear,
        "count" | "n" => Command::Count,
        "status" | "s" | "" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        _ => return None,
    };
    Some(cmd)
}
