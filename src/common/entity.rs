//! Spawn Bootstrap: extracts the initial camera position/angle from the entity lump.
//!
//! The entity lump is a sequence of brace-delimited blocks of quoted `"key" "value"` pairs:
//!
//! ```text
//! {
//! "classname" "info_player_deathmatch"
//! "origin" "0 128 24"
//! "angle" "90"
//! }
//! ```
//!
//! A general entity-lump grammar belongs to a separate lexer/parser, but the small state machine
//! that yields `(key, value)` pairs is reproduced here because nothing else in the crate can
//! otherwise feed the spawn bootstrap its input.
//! Malformed input (an unterminated string, a missing `{`/`}`) is logged as a warning and does
//! not abort the load; any field left unset falls through to the documented default.

use cgmath::Vector3;
use log::warn;

use crate::common::math::normalize_angle;

/// Initial camera state extracted from the entity lump.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Spawn {
    pub origin: Vector3<f32>,
    /// Radians.
    pub angle: f32,
}

impl Default for Spawn {
    fn default() -> Spawn {
        Spawn {
            origin: Vector3::new(0.0, 0.0, 0.0),
            angle: 0.0,
        }
    }
}

/// One `{ ... }` block of key/value pairs.
type EntityFields = Vec<(String, String)>;

/// Lexes the entity string into a list of entities, each a list of `(key, value)` pairs.
/// Tolerant: a malformed block is reported via `warn!` and parsing stops at that point, but
/// whatever entities were fully parsed before the error are still returned.
fn parse_entities(data: &str) -> Vec<EntityFields> {
    let mut chars = data.char_indices().peekable();
    let mut entities = Vec::new();

    loop {
        skip_whitespace(&mut chars);
        match chars.peek() {
            None => break,
            Some(&(_, '{')) => {
                chars.next();
            }
            Some(&(pos, c)) => {
                warn!("entity lump: expected '{{' at byte {pos}, found {c:?}");
                break;
            }
        }

        let mut fields = EntityFields::new();
        loop {
            skip_whitespace(&mut chars);
            match chars.peek() {
                Some(&(_, '}')) => {
                    chars.next();
                    break;
                }
                Some(&(_, '"')) => {
                    let key = match read_quoted_string(&mut chars) {
                        Some(s) => s,
                        None => {
                            warn!("entity lump: unterminated key string");
                            entities.push(fields);
                            return entities;
                        }
                    };

                    skip_whitespace(&mut chars);
                    let value = match read_quoted_string(&mut chars) {
                        Some(s) => s,
                        None => {
                            warn!("entity lump: unterminated value string for key {key:?}");
                            entities.push(fields);
                            return entities;
                        }
                    };

                    fields.push((key, value));
                }
                Some(&(pos, c)) => {
                    warn!("entity lump: expected '\"' or '}}' at byte {pos}, found {c:?}");
                    entities.push(fields);
                    return entities;
                }
                None => {
                    warn!("entity lump: unterminated entity block (missing '}}')");
                    entities.push(fields);
                    return entities;
                }
            }
        }

        entities.push(fields);
    }

    entities
}

fn skip_whitespace(chars: &mut std::iter::Peekable<std::str::CharIndices>) {
    while let Some(&(_, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else {
            break;
        }
    }
}

fn read_quoted_string(chars: &mut std::iter::Peekable<std::str::CharIndices>) -> Option<String> {
    match chars.peek() {
        Some(&(_, '"')) => {
            chars.next();
        }
        _ => return None,
    }

    let mut s = String::new();
    loop {
        match chars.next() {
            Some((_, '"')) => return Some(s),
            Some((_, c)) => s.push(c),
            None => return None,
        }
    }
}

fn field<'a>(fields: &'a EntityFields, key: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Spawn-point classnames checked, in priority order. Single-player Quake 3 maps use
/// `info_player_start`; deathmatch maps carry `info_player_deathmatch` instead. Checking both
/// means a map built around either convention spawns the player correctly.
const SPAWN_CLASSNAMES: [&str; 2] = ["info_player_start", "info_player_deathmatch"];

/// Extracts the first matching spawn entity's origin and facing angle, falling back to the
/// documented default (`origin = 0`, `angle = 0`) for any field that is absent or unparsable.
pub fn bootstrap_spawn(entity_lump: &str) -> Spawn {
    let entities = parse_entities(entity_lump);

    let spawn_fields = SPAWN_CLASSNAMES.iter().find_map(|classname| {
        entities
            .iter()
            .find(|fields| field(fields, "classname") == Some(*classname))
    });

    let Some(fields) = spawn_fields else {
        return Spawn::default();
    };

    let mut spawn = Spawn::default();

    if let Some(angle) = field(fields, "angle") {
        match angle.trim().parse::<f32>() {
            Ok(deg) => spawn.angle = normalize_angle(deg.to_radians()),
            Err(_) => warn!("entity lump: unparsable angle {angle:?}"),
        }
    }

    if let Some(origin) = field(fields, "origin") {
        let mut parts = origin.split_whitespace().filter_map(|s| s.parse::<f32>().ok());
        match (parts.next(), parts.next(), parts.next()) {
            (Some(x), Some(y), Some(z)) => spawn.origin = Vector3::new(x, y, z),
            _ => warn!("entity lump: unparsable origin {origin:?}"),
        }
    }

    spawn
}
