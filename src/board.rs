// Board model: typed snapshot of one game tick
//
// A BoardState is rebuilt from every update. Nothing carries over between ticks.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::ParseError;
use crate::protocol::RawGame;
use crate::types::{Direction, GridSize, Item, ItemKind, PlayerId, Position, Snake};

/// Complete state of one tick
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct BoardState {
    pub size: GridSize,
    pub snakes: Vec<Snake>,
    pub items: Vec<Item>,
    pub tick: u64,
    /// True when the server reports the game as stopped or a snake as dead
    pub terminal: bool,
}

impl BoardState {
    /// Decodes the `game` object of a state frame
    pub fn from_json(game: &Value, defaults: GridSize, fallback_tick: u64) -> Result<Self, ParseError> {
        let raw: RawGame = serde_json::from_value(game.clone())
            .map_err(|e| ParseError::Malformed(e.to_string()))?;
        Self::parse(&raw, defaults, fallback_tick)
    }

    /// Builds a typed board from a raw update
    ///
    /// # Arguments
    /// * `raw` - Decoded game object
    /// * `defaults` - Grid size to assume when the update does not carry one
    /// * `fallback_tick` - Sequence number to use when the update has no tick
    pub fn parse(raw: &RawGame, defaults: GridSize, fallback_tick: u64) -> Result<Self, ParseError> {
        let size = GridSize {
            width: raw.width.unwrap_or(defaults.width),
            height: raw.height.unwrap_or(defaults.height),
        };
        if size.width <= 0 || size.height <= 0 {
            return Err(ParseError::Malformed(format!(
                "grid must be non-empty, got {}x{}",
                size.width, size.height
            )));
        }

        let raw_snakes = raw.snakes.as_ref().ok_or(ParseError::MissingField("snakes"))?;

        let mut snakes = Vec::with_capacity(raw_snakes.len());
        for (key, raw_snake) in raw_snakes {
            let id = key
                .trim()
                .parse::<u8>()
                .map(PlayerId)
                .map_err(|_| ParseError::InvalidPlayerId(key.clone()))?;

            let body: Vec<Position> = raw_snake
                .body
                .as_ref()
                .ok_or(ParseError::MissingField("snake.body"))?
                .iter()
                .map(|&[x, y]| Position::new(y, x))
                .collect();
            if body.is_empty() {
                return Err(ParseError::MissingField("snake.body"));
            }

            for cell in &body {
                check_bounds("snake cell", cell, size)?;
            }

            let heading = match raw_snake.direction.as_deref() {
                Some(name) => Direction::parse(name)
                    .ok_or_else(|| ParseError::InvalidDirection(name.to_string()))?,
                None => derive_heading(&body),
            };

            snakes.push(Snake {
                id,
                body,
                heading,
                alive: raw_snake.alive.unwrap_or(true),
            });
        }
        snakes.sort_by_key(|s| s.id);

        let mut items = Vec::new();
        if let Some(food) = &raw.food {
            for [x, y] in food.cells() {
                let position = Position::new(y, x);
                check_bounds("item", &position, size)?;
                items.push(Item {
                    position,
                    kind: ItemKind::Food,
                });
            }
        }

        let terminal = !raw.running || snakes.iter().any(|s| !s.alive);
        if !terminal {
            check_collisions(&snakes)?;
        }

        Ok(BoardState {
            size,
            snakes,
            items,
            tick: raw.tick.unwrap_or(fallback_tick),
            terminal,
        })
    }

    pub fn snake(&self, id: PlayerId) -> Option<&Snake> {
        self.snakes.iter().find(|s| s.id == id)
    }

    /// Every snake other than `id`
    pub fn opponents(&self, id: PlayerId) -> impl Iterator<Item = &Snake> {
        self.snakes.iter().filter(move |s| s.id != id)
    }

    /// Whether any snake body (head included) covers the position
    pub fn is_occupied(&self, pos: &Position) -> bool {
        self.snakes.iter().any(|s| s.body.contains(pos))
    }
}

fn check_bounds(what: &'static str, pos: &Position, size: GridSize) -> Result<(), ParseError> {
    if size.contains(pos) {
        Ok(())
    } else {
        Err(ParseError::OutOfBounds {
            what,
            position: *pos,
            width: size.width,
            height: size.height,
        })
    }
}

/// Heading implied by the neck-to-head step; a lone head spawns facing right
fn derive_heading(body: &[Position]) -> Direction {
    body.get(1)
        .and_then(|neck| Direction::between(neck, &body[0]))
        .unwrap_or(Direction::Right)
}

fn check_collisions(snakes: &[Snake]) -> Result<(), ParseError> {
    let mut owners: HashMap<Position, PlayerId> = HashMap::new();
    for snake in snakes {
        for cell in &snake.body {
            match owners.get(cell) {
                Some(&owner) if owner != snake.id => {
                    return Err(ParseError::Collision {
                        position: *cell,
                        first: owner,
                        second: snake.id,
                    });
                }
                Some(_) => {}
                None => {
                    owners.insert(*cell, snake.id);
                }
            }
        }
    }
    Ok(())
}
