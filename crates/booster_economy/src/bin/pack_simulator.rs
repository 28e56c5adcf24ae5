//! # Pack Simulator
//!
//! Opens simulated booster packs against a demo pool and prints the observed
//! rarity histogram next to the configured odds.
//!
//! Usage: `pack_simulator [count] [seed] [--config <file.toml>]`

use booster_economy::distribution::format_bp;
use booster_economy::{BoosterEngine, EconomyConfig, EconomyLedger, InMemoryCardPool, InMemoryCatalog};
use booster_shared::{Attack, CardTemplate, CardType, RarityTier};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;

const DEFAULT_COUNT: u32 = 1_000;
const DEFAULT_SEED: u64 = 0x0B00_57E4;

fn demo_pool() -> Result<InMemoryCardPool, booster_economy::ValidationError> {
    let cards = [
        (1, "Rattata", CardType::Normal, RarityTier::Common, 30),
        (2, "Caterpie", CardType::Grass, RarityTier::Common, 40),
        (3, "Magikarp", CardType::Water, RarityTier::Common, 30),
        (4, "Geodude", CardType::Fighting, RarityTier::Common, 50),
        (5, "Pikachu", CardType::Electric, RarityTier::Uncommon, 60),
        (6, "Growlithe", CardType::Fire, RarityTier::Uncommon, 70),
        (7, "Haunter", CardType::Psychic, RarityTier::Rare, 80),
        (8, "Gyarados", CardType::Water, RarityTier::Rare, 130),
        (9, "Charizard", CardType::Fire, RarityTier::UltraRare, 150),
        (10, "Mewtwo", CardType::Psychic, RarityTier::SecretRare, 170),
    ];

    InMemoryCardPool::from_templates(cards.into_iter().map(|(id, name, card_type, rarity, hp)| {
        CardTemplate::new(id, name, card_type, rarity, hp).with_attack(Attack::new("Tackle", 20))
    }))
}

fn main() {
    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║         BOOSTER PACK SIMULATOR                                   ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .cloned();
    let positional: Vec<&String> = {
        let mut skip_next = false;
        args.iter()
            .filter(|a| {
                if skip_next {
                    skip_next = false;
                    return false;
                }
                if *a == "--config" {
                    skip_next = true;
                    return false;
                }
                true
            })
            .collect()
    };

    let count = positional.first().and_then(|s| s.parse().ok()).unwrap_or(DEFAULT_COUNT);
    let seed = positional.get(1).and_then(|s| s.parse().ok()).unwrap_or(DEFAULT_SEED);

    let config = match &config_path {
        Some(path) => match EconomyConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                println!("Error: {e}");
                return;
            }
        },
        None => EconomyConfig::default(),
    };

    let pool = match demo_pool() {
        Ok(pool) => Arc::new(pool),
        Err(e) => {
            println!("Error: demo pool rejected: {e}");
            return;
        }
    };

    let engine = match BoosterEngine::new(
        config,
        Arc::new(EconomyLedger::new()),
        pool,
        Arc::new(InMemoryCatalog::new()),
        [0; 32],
    ) {
        Ok(engine) => engine,
        Err(e) => {
            println!("Error: {e}");
            return;
        }
    };

    println!("┌─ CONFIGURED ODDS ────────────────────────────────────────────────┐");
    for (label, odds) in engine.booster_odds().describe() {
        println!("│ {label:<12} {odds}");
    }
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    println!("Opening {count} packs (seed {seed})...");
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let stats = match engine.simulate_openings(count, &mut rng) {
        Ok(stats) => stats,
        Err(e) => {
            println!("Error: {e}");
            return;
        }
    };
    println!();

    let effective = engine.config().distribution.effective_bonus_bp();
    println!("┌─ BONUS DRAW ─────────────────────────────────────────────────────┐");
    for (tier, bp) in effective {
        println!(
            "│ {:<12} expected {:>6}   observed {:>6.2}%",
            tier.label(),
            format_bp(bp),
            stats.bonus_rate_percent(tier)
        );
    }
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    println!("┌─ CARDS BY RARITY ────────────────────────────────────────────────┐");
    for tier in RarityTier::ALL {
        let cards = stats.cards_by_rarity.get(&tier).copied().unwrap_or(0);
        println!("│ {:<12} {cards:>10}", tier.label());
    }
    println!("│ {:<12} {:>10}", "Total", stats.cards);
    println!("└──────────────────────────────────────────────────────────────────┘");
}
