//! Bot move policies.
//!
//! Every tier is a pure function of the position and its legal move set; the
//! random tiers take the RNG as an argument so callers can seed them.

use std::fmt;
use std::str::FromStr;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::MoveError;
use crate::notation::Move;
use crate::position::{Position, Terminal};

/// Probability that the capture-biased tier picks among captures when any exist.
pub const CAPTURE_BIAS: f64 = 0.7;

/// Starting score for the greedy tier; any real evaluation beats it.
const SCORE_SENTINEL: i32 = -9999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum Tier {
    /// Uniform over legal moves.
    Random,
    /// Prefers captures with probability `CAPTURE_BIAS`.
    CaptureBiased,
    /// One-ply material count, first-seen wins ties.
    GreedyMaterial,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Random, Tier::CaptureBiased, Tier::GreedyMaterial];

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Random => "random",
            Tier::CaptureBiased => "capture_biased",
            Tier::GreedyMaterial => "greedy_material",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    /// Accepts the tier name or its level number (1-3).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1" | "random" => Ok(Tier::Random),
            "2" | "capture_biased" => Ok(Tier::CaptureBiased),
            "3" | "greedy_material" => Ok(Tier::GreedyMaterial),
            other => Err(format!("unknown bot tier '{other}'")),
        }
    }
}

impl TryFrom<String> for Tier {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Pick a move for the side to move. `None` when there are no legal moves.
pub fn choose_move<R: Rng + ?Sized>(tier: Tier, position: &Position, rng: &mut R) -> Option<Move> {
    let legal = position.legal_moves();
    match tier {
        Tier::Random => legal.choose(rng).copied(),
        Tier::CaptureBiased => {
            let captures = position.captures();
            if !captures.is_empty() && rng.gen_bool(CAPTURE_BIAS) {
                captures.choose(rng).copied()
            } else {
                legal.choose(rng).copied()
            }
        }
        Tier::GreedyMaterial => greedy_material(position, &legal),
    }
}

/// Result of one human-versus-bot exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BotTurn {
    pub human_move: Move,
    /// `None` when the human move ended the game.
    pub bot_move: Option<Move>,
    pub position: Position,
    pub terminal: Terminal,
}

/// Apply the human's move text, then let `tier` reply unless the game is over.
pub fn play_vs_bot<R: Rng + ?Sized>(
    position: &Position,
    move_text: &str,
    tier: Tier,
    rng: &mut R,
) -> Result<BotTurn, MoveError> {
    let (human_move, after_human) = position.apply_text(move_text)?;
    if after_human.terminal().is_over() {
        return Ok(BotTurn {
            human_move,
            bot_move: None,
            terminal: after_human.terminal(),
            position: after_human,
        });
    }

    let Some(reply) = choose_move(tier, &after_human, rng) else {
        return Ok(BotTurn {
            human_move,
            bot_move: None,
            terminal: after_human.terminal(),
            position: after_human,
        });
    };
    let after_bot = after_human.apply(&reply)?;
    Ok(BotTurn {
        human_move,
        bot_move: Some(reply),
        terminal: after_bot.terminal(),
        position: after_bot,
    })
}

/// Material balance of the position after a move, counted over the whole
/// board for the side to move in `after`: own pieces minus opponent pieces.
pub fn greedy_score(after: &Position) -> i32 {
    let side = after.side_to_move();
    after.material(side) - after.material(side.opponent())
}

fn greedy_material(position: &Position, legal: &[Move]) -> Option<Move> {
    let first = *legal.first()?;
    let mut best = first;
    let mut best_score = SCORE_SENTINEL;

    for mv in legal {
        let Ok(after) = position.apply(mv) else {
            continue;
        };
        let score = greedy_score(&after);
        if score > best_score {
            best_score = score;
            best = *mv;
        }
    }

    Some(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    const TRIALS: usize = 10_000;

    // 1.e4 d5: exd5 is White's only capture
    const ONE_CAPTURE_FEN: &str = "rnbqkbnr/ppp1pppp/8/3p4/4P3/8/PPPP1PPP/RNBQKBNR w KQkq d6 0 2";

    #[test]
    fn test_random_tier_is_uniform() {
        let pos = Position::initial();
        let legal = pos.legal_moves();
        let k = legal.len();
        let mut rng = StdRng::seed_from_u64(7);
        let mut counts: HashMap<Move, usize> = HashMap::new();

        for _ in 0..TRIALS {
            let mv = choose_move(Tier::Random, &pos, &mut rng).unwrap();
            *counts.entry(mv).or_default() += 1;
        }

        assert_eq!(counts.len(), k);
        let expected = TRIALS as f64 / k as f64;
        for (mv, count) in counts {
            // ~4.5 standard deviations for p = 1/20
            assert!(
                (count as f64 - expected).abs() < 100.0,
                "{mv} chosen {count} times, expected ~{expected}"
            );
        }
    }

    #[test]
    fn test_capture_biased_tier_prefers_captures() {
        let pos = Position::from_fen(ONE_CAPTURE_FEN).unwrap();
        let captures = pos.captures();
        let k = pos.legal_moves().len() as f64;
        assert_eq!(captures.len(), 1);

        let mut rng = StdRng::seed_from_u64(42);
        let hits = (0..TRIALS)
            .filter(|_| {
                let mv = choose_move(Tier::CaptureBiased, &pos, &mut rng).unwrap();
                captures.contains(&mv)
            })
            .count();

        // The fallback branch can also land on the capture
        let expected = CAPTURE_BIAS + (1.0 - CAPTURE_BIAS) / k;
        assert!((expected - CAPTURE_BIAS).abs() < 0.02);

        let fraction = hits as f64 / TRIALS as f64;
        assert!((fraction - expected).abs() < 0.02, "fraction {fraction}, expected {expected}");
    }

    #[test]
    fn test_capture_biased_without_captures_stays_legal() {
        let pos = Position::initial();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..200 {
            let mv = choose_move(Tier::CaptureBiased, &pos, &mut rng).unwrap();
            assert!(pos.is_legal(&mv));
        }
    }

    #[test]
    fn test_greedy_tier_is_deterministic() {
        let fens = [
            ONE_CAPTURE_FEN,
            "r1bqkb1r/pppp1ppp/2n2n2/4p2Q/2B1P3/8/PPPP1PPP/RNB1K1NR w KQkq - 4 4",
        ];
        for fen in fens {
            let pos = Position::from_fen(fen).unwrap();
            let mut a = StdRng::seed_from_u64(1);
            let mut b = StdRng::seed_from_u64(999);
            let first = choose_move(Tier::GreedyMaterial, &pos, &mut a);
            let second = choose_move(Tier::GreedyMaterial, &pos, &mut b);
            assert!(first.is_some());
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_greedy_tier_takes_first_strict_maximum() {
        let pos =
            Position::from_fen("r1bqkb1r/pppp1ppp/2n2n2/4p2Q/2B1P3/8/PPPP1PPP/RNB1K1NR w KQkq - 4 4")
                .unwrap();
        let legal = pos.legal_moves();
        let scores: Vec<i32> = legal
            .iter()
            .map(|m| greedy_score(&pos.apply(m).unwrap()))
            .collect();
        let max = *scores.iter().max().unwrap();
        let expected = legal[scores.iter().position(|&s| s == max).unwrap()];

        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(choose_move(Tier::GreedyMaterial, &pos, &mut rng), Some(expected));
    }

    #[test]
    fn test_no_legal_moves_yields_none() {
        let mated =
            Position::from_fen("rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3")
                .unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        for tier in Tier::ALL {
            assert_eq!(choose_move(tier, &mated, &mut rng), None);
        }
    }

    #[test]
    fn test_play_vs_bot_replies_for_black() {
        let mut rng = StdRng::seed_from_u64(11);
        let turn = play_vs_bot(&Position::initial(), "e2e4", Tier::CaptureBiased, &mut rng).unwrap();
        assert_eq!(turn.human_move.to_string(), "e2e4");
        let reply = turn.bot_move.unwrap();
        assert_eq!(turn.position.side_to_move(), crate::Color::White);
        assert_eq!(turn.position.fen().split(' ').nth(5), Some("2"));
        assert_eq!(turn.terminal, Terminal::None);

        let after_e4 = Position::initial().apply(&"e2e4".parse().unwrap()).unwrap();
        assert!(after_e4.is_legal(&reply));
    }

    #[test]
    fn test_play_vs_bot_stops_when_human_mates() {
        // Black to play Qh4#
        let pos =
            Position::from_fen("rnbqkbnr/pppp1ppp/8/4p3/6P1/5P2/PPPPP2P/RNBQKBNR b KQkq - 0 2")
                .unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let turn = play_vs_bot(&pos, "d8h4", Tier::Random, &mut rng).unwrap();
        assert_eq!(turn.bot_move, None);
        assert_eq!(turn.terminal, Terminal::Checkmate);
    }

    #[test]
    fn test_play_vs_bot_reports_parse_and_illegal_separately() {
        let mut rng = StdRng::seed_from_u64(0);
        let pos = Position::initial();
        assert!(matches!(
            play_vs_bot(&pos, "e2-e4", Tier::Random, &mut rng),
            Err(MoveError::Parse(_))
        ));
        assert!(matches!(
            play_vs_bot(&pos, "e2e5", Tier::Random, &mut rng),
            Err(MoveError::Illegal { .. })
        ));
    }

    #[test]
    fn test_tier_parsing() {
        assert_eq!("1".parse::<Tier>(), Ok(Tier::Random));
        assert_eq!("greedy_material".parse::<Tier>(), Ok(Tier::GreedyMaterial));
        assert!("4".parse::<Tier>().is_err());
    }

    #[test]
    fn test_tier_json_accepts_names_and_levels() {
        let named: Tier = serde_json::from_str(r#""capture_biased""#).unwrap();
        assert_eq!(named, Tier::CaptureBiased);
        let level: Tier = serde_json::from_str(r#""3""#).unwrap();
        assert_eq!(level, Tier::GreedyMaterial);
        assert!(serde_json::from_str::<Tier>(r#""9""#).is_err());
        assert_eq!(serde_json::to_string(&Tier::Random).unwrap(), r#""random""#);
    }
}
