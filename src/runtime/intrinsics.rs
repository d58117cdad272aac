use crate::runtime::callback::{call_argument, call_argument_count};
use crate::runtime::stack::ConvStack;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

/// Number of quest flags tracked by default.
const QUEST_FLAGS: usize = 64;

/// Imported functions a host can answer without game state: string
/// comparisons over the conversation's string table, `random`, `sex` and
/// the quest flags.
///
/// Hosts forward `call_external` and `get_global` here and handle whatever
/// returns `None`.
#[derive(Debug, Clone)]
pub struct Intrinsics {
    strings: Vec<String>,
    rng: StdRng,
    /// 0 = male, anything else = female.
    pub player_gender: u16,
    pub player_name: String,
    pub quest_flags: Vec<u16>,
}

impl Intrinsics {
    pub fn new(strings: Vec<String>, seed: u64) -> Self {
        Self {
            strings,
            rng: StdRng::seed_from_u64(seed),
            player_gender: 0,
            player_name: "Avatar".to_string(),
            quest_flags: vec![0; QUEST_FLAGS],
        }
    }

    pub fn strings(&self) -> &[String] {
        &self.strings
    }

    /// Append a runtime string (e.g. the player's name); returns its id.
    pub fn alloc_string(&mut self, text: impl Into<String>) -> u16 {
        self.strings.push(text.into());
        (self.strings.len() - 1) as u16
    }

    pub fn string(&self, id: u16) -> Option<&str> {
        self.strings.get(id as usize).map(String::as_str)
    }

    /// Initial value of imported global `name`, if it is one we know.
    ///
    /// `play_name` is a string id, so each lookup allocates the player's name.
    pub fn global(&mut self, name: &str) -> Option<u16> {
        match name {
            "play_name" => Some(self.alloc_string(self.player_name.clone())),
            "play_sex" => Some(self.player_gender),
            _ => None,
        }
    }

    /// Run intrinsic `name`; `None` if it is not one of ours or its
    /// arguments are unreadable.
    pub fn call(&mut self, name: &str, stack: &mut ConvStack) -> Option<u16> {
        let argc = call_argument_count(stack);
        let arg = |i| call_argument(stack, i);

        let result = match name {
            "compare" => {
                expect_args(name, argc, 2);
                let (a, b) = (self.lowercase(arg(0)?)?, self.lowercase(arg(1)?)?);
                (a == b) as u16
            }
            "contains" => {
                expect_args(name, argc, 2);
                let (a, b) = (self.lowercase(arg(0)?)?, self.lowercase(arg(1)?)?);
                a.contains(&b) as u16
            }
            "length" => {
                expect_args(name, argc, 1);
                self.string(arg(0)?)?.len() as u16
            }
            "random" => {
                expect_args(name, argc, 1);
                let range = arg(0)?;
                if range == 0 {
                    1
                } else {
                    self.rng.random_range(1..=range)
                }
            }
            "sex" => {
                expect_args(name, argc, 2);
                let (female, male) = (arg(0)?, arg(1)?);
                if self.player_gender == 0 { male } else { female }
            }
            "get_quest" => {
                expect_args(name, argc, 1);
                let flag = arg(0)? as usize;
                self.quest_flags.get(flag).copied().unwrap_or(0)
            }
            "set_quest" => {
                expect_args(name, argc, 2);
                let (value, flag) = (arg(0)?, arg(1)? as usize);
                if flag >= self.quest_flags.len() {
                    self.quest_flags.resize(flag + 1, 0);
                }
                self.quest_flags[flag] = value;
                0
            }
            _ => return None,
        };

        debug!(intrinsic = name, result, "intrinsic");
        Some(result)
    }

    fn lowercase(&self, id: u16) -> Option<String> {
        self.string(id).map(str::to_lowercase)
    }
}

fn expect_args(name: &str, got: u16, want: u16) {
    if got != want {
        warn!(intrinsic = name, got, want, "unexpected argument count");
    }
}
