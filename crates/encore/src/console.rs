use std::time::Duration;

use encore_core::{
    CueId, FadeCurve, FadeSpec, GroupTargets, GroupTrigger, ShowCommand, TriggerAction,
    TriggerCommand,
};

pub const USAGE: &str = "commands:
  go                                  start the cue at the cursor
  goto INDEX                          move the cursor
  start|stop|kill|pause|resume|toggle ID [FADE_SECONDS]
  group FROM TO [STAGGER_MS]          start stack entries FROM..=TO
  next COUNT [STAGGER_MS]             start the next COUNT entries
  remove ID                           unregister a cue
  status | cursor | quit";

/// Parse one line typed at the operator console.
///
/// Blank lines parse to `None`. Fades typed without a curve use
/// `default_curve`.
pub fn parse_line(line: &str, default_curve: &FadeCurve) -> Result<Option<ShowCommand>, String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((&verb, args)) = words.split_first() else {
        return Ok(None);
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "go" | "g" => ShowCommand::Go,
        "goto" => ShowCommand::GoTo {
            index: parse_arg(args, 0, "INDEX")?,
        },
        "start" | "stop" | "kill" | "pause" | "resume" | "toggle" => {
            let action = match verb.to_ascii_lowercase().as_str() {
                "start" => TriggerAction::Start,
                "stop" => TriggerAction::Stop,
                "kill" => TriggerAction::StopImmediate,
                "pause" => TriggerAction::Pause,
                "resume" => TriggerAction::Resume,
                _ => TriggerAction::Toggle,
            };
            let id = CueId(parse_arg(args, 0, "ID")?);
            let mut trigger = TriggerCommand::new(id, action);
            if args.len() > 1 {
                let seconds: f64 = parse_arg(args, 1, "FADE_SECONDS")?;
                let duration = Duration::try_from_secs_f64(seconds)
                    .map_err(|_| format!("invalid fade time '{}'", args[1]))?;
                trigger = trigger.with_fade(FadeSpec::new(duration, default_curve.clone()));
            }
            ShowCommand::Trigger(trigger)
        }
        "group" => {
            let from = parse_arg(args, 0, "FROM")?;
            let to = parse_arg(args, 1, "TO")?;
            let stagger = parse_stagger(args, 2)?;
            ShowCommand::Group(
                GroupTrigger::new(GroupTargets::Range { from, to }, TriggerAction::Start)
                    .with_stagger(stagger),
            )
        }
        "next" => {
            let count = parse_arg(args, 0, "COUNT")?;
            let stagger = parse_stagger(args, 1)?;
            ShowCommand::Group(
                GroupTrigger::new(GroupTargets::Next(count), TriggerAction::Start)
                    .with_stagger(stagger),
            )
        }
        "remove" => ShowCommand::Unregister(CueId(parse_arg(args, 0, "ID")?)),
        "status" => ShowCommand::QueryActiveCues,
        "cursor" => ShowCommand::QueryCursor,
        "quit" | "exit" | "q" => ShowCommand::Shutdown,
        other => return Err(format!("unknown command '{}'", other)),
    };
    Ok(Some(command))
}

fn parse_stagger(args: &[&str], index: usize) -> Result<Duration, String> {
    if args.len() > index {
        Ok(Duration::from_millis(parse_arg(args, index, "STAGGER_MS")?))
    } else {
        Ok(Duration::ZERO)
    }
}

fn parse_arg<T: std::str::FromStr>(args: &[&str], index: usize, name: &str) -> Result<T, String> {
    let raw = args.get(index).ok_or_else(|| format!("missing {}", name))?;
    raw.parse()
        .map_err(|_| format!("invalid {} '{}'", name, raw))
}
