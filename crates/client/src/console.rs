use std::io::{self, BufRead, Write};

use glam::IVec2;
use skirmish::{Action, ClientError, GameClient, MoveFlags, RoomId};

const USAGE: &str = "\
commands:
  login <user> <pass>      register <user> <pass>   logout
  create <name> [max=N]    join <room id>           list
  leave                    start                    ready
  end                      move [l|r|u|d ...]       shoot <x> <y>
  status                   quit";

const DEFAULT_MAX_PLAYERS: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login { username: String, password: String },
    Register { username: String, password: String },
    Logout,
    Create { name: String, max_players: u32 },
    Join(RoomId),
    List,
    Leave,
    Start,
    Ready,
    End,
    Move(MoveFlags),
    Shoot(IVec2),
    Status,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err("empty command".to_string());
        };
        let args: Vec<&str> = words.collect();

        let credentials = |args: &[&str]| match args {
            [user, pass] => Ok((user.to_string(), pass.to_string())),
            _ => Err(format!("usage: {verb} <user> <pass>")),
        };

        let command = match verb.to_ascii_lowercase().as_str() {
            "login" => {
                let (username, password) = credentials(&args[..])?;
                Command::Login { username, password }
            }
            "register" => {
                let (username, password) = credentials(&args[..])?;
                Command::Register { username, password }
            }
            "logout" => Command::Logout,
            "create" => {
                let (words, max_players) = match args.split_last() {
                    Some((last, rest)) if last.starts_with("max=") => {
                        let max = &last["max=".len()..];
                        let max = max.parse().map_err(|_| format!("bad player count {max}"))?;
                        (rest, max)
                    }
                    _ => (&args[..], DEFAULT_MAX_PLAYERS),
                };
                if words.is_empty() {
                    return Err("usage: create <name> [max=N]".to_string());
                }
                Command::Create {
                    name: words.join(" "),
                    max_players,
                }
            }
            "join" => match args.as_slice() {
                [id] => Command::Join(id.parse().map_err(|_| format!("bad room id {id}"))?),
                _ => return Err("usage: join <room id>".to_string()),
            },
            "list" => Command::List,
            "leave" => Command::Leave,
            "start" => Command::Start,
            "ready" => Command::Ready,
            "end" => Command::End,
            "move" => {
                let mut flags = MoveFlags::empty();
                for key in &args {
                    flags |= MoveFlags::from_key(key)
                        .ok_or_else(|| format!("bad direction {key}"))?;
                }
                Command::Move(flags)
            }
            "shoot" => match args.as_slice() {
                [x, y] => {
                    let x = x.parse().map_err(|_| format!("bad coordinate {x}"))?;
                    let y = y.parse().map_err(|_| format!("bad coordinate {y}"))?;
                    Command::Shoot(IVec2::new(x, y))
                }
                _ => return Err("usage: shoot <x> <y>".to_string()),
            },
            "status" => Command::Status,
            "quit" | "exit" => Command::Quit,
            other => return Err(format!("unknown command {other}")),
        };
        Ok(command)
    }
}

fn execute(client: &GameClient, command: Command) -> Result<(), ClientError> {
    match command {
        Command::Login { username, password } => {
            let user_id = client.login(&username, &password)?;
            println!("logged in as {username} (id {user_id})");
        }
        Command::Register { username, password } => {
            let user_id = client.register(&username, &password)?;
            println!("registered {username} (id {user_id})");
        }
        Command::Logout => {
            client.logout()?;
            println!("logged out");
        }
        Command::Create { name, max_players } => {
            let room_id = client.create_room(&name, max_players)?;
            println!("created room '{name}' (id {room_id})");
        }
        Command::Join(room_id) => {
            let room_id = client.join_room(room_id)?;
            println!("joined room {room_id}");
        }
        Command::List => {
            let rooms = client.list_rooms()?;
            if rooms.is_empty() {
                println!("no rooms");
            }
            for room in rooms {
                println!(
                    "{:>5}  {:<20} {}/{}  state {}{}",
                    room.id,
                    room.name,
                    room.current_players,
                    room.max_players,
                    room.state,
                    if room.is_full() { "  full" } else { "" }
                );
            }
        }
        Command::Leave => {
            client.leave_room()?;
            println!("left room");
        }
        Command::Start => {
            client.start_game()?;
            println!("game started");
        }
        Command::Ready => {
            client.mark_ready()?;
            println!("marked as ready");
        }
        Command::End => {
            client.end_game()?;
            println!("game ended");
        }
        Command::Move(flags) => client.send_telemetry(&client.telemetry().with_movement(flags))?,
        Command::Shoot(target) => {
            client.send_telemetry(&client.telemetry().with_action(Action::Shoot, 1, target))?
        }
        Command::Status => print_status(client),
        Command::Quit => {}
    }
    Ok(())
}

fn print_status(client: &GameClient) {
    println!("state: {}", client.state());
    if client.user_id() != 0 {
        println!("user: {} (id {})", client.username(), client.user_id());
    }
    match client.current_room() {
        Some(room) => println!(
            "room: {} {:?} players {:?} owner {}",
            room.id, room.name, room.players, room.owner_id
        ),
        None if client.current_room_id() != 0 => println!("room: {}", client.current_room_id()),
        None => {}
    }
    let world = client.latest_world();
    if !world.players.is_empty() {
        println!(
            "match {}: {} players, {} bullets",
            world.match_id,
            world.players.len(),
            world.bullets.len()
        );
        if let Some(me) = world.player(client.config().player_id) {
            println!("you: at ({:.1}, {:.1}) health {}", me.position.x, me.position.y, me.health);
        }
    }
    if let Some(stats) = client.stats() {
        println!(
            "sent {} frames / {} datagrams, received {} frames / {} datagrams, pending {}",
            stats.frames_sent,
            stats.datagrams_sent,
            stats.frames_received,
            stats.datagrams_received,
            client.pending_requests()
        );
    }
}

/// Reads commands from stdin until `quit`, end of input or a lost session.
pub fn run(client: &GameClient) -> io::Result<()> {
    println!("{USAGE}");
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        write!(stdout, "[{}]> ", client.state())?;
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(());
        }
        if line.trim().is_empty() {
            continue;
        }

        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(message) => {
                println!("{message}\n{USAGE}");
                continue;
            }
        };
        if command == Command::Quit {
            return Ok(());
        }

        if let Err(e) = execute(client, command) {
            println!("error: {e}");
            if e.is_fatal() {
                log::error!("Session lost: {}", e);
                return Ok(());
            }
        }
    }
}
