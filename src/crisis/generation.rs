use std::collections::BTreeMap;

use noise::{NoiseFn, Perlin};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use uuid::Uuid;

use crate::config::scenario::ScenarioParams;
use crate::crisis::grid::{Bounds, Coords, CostGrid, IMPASSABLE};
use crate::crisis::{Crisis, CrisisId, Dataset, Division, Faction, Unit, UnitType};

const FACTION_NAMES: [&str; 8] = [
    "Northern League",
    "Southern Pact",
    "Eastern Union",
    "Western Accord",
    "Free Cities",
    "Coastal Republic",
    "Highland Clans",
    "River Compact",
];

const UNIT_TYPE_NAMES: [&str; 3] = ["Infantry", "Cavalry", "Artillery"];

/// Generate a dataset holding one active crisis built from `params`.
///
/// If `params.seed` is 0, a random seed is chosen. The dataset name records
/// the seed actually used.
pub fn generate_dataset(params: &ScenarioParams) -> Dataset {
    let seed = if params.seed == 0 {
        rand::thread_rng().r#gen()
    } else {
        params.seed
    };
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let crisis_id: CrisisId = 1;

    let bounds = Bounds::new(params.width, params.height);
    let costs = generate_costs(bounds, seed as u32, params);

    let factions: Vec<Faction> = (0..params.faction_count)
        .map(|i| Faction {
            id: i + 1,
            crisis_id,
            name: FACTION_NAMES[i as usize % FACTION_NAMES.len()].to_string(),
        })
        .collect();
    let unit_types: Vec<UnitType> = UNIT_TYPE_NAMES
        .iter()
        .enumerate()
        .map(|(i, name)| UnitType {
            id: i as u32 + 1,
            name: name.to_string(),
        })
        .collect();

    let mut divisions = BTreeMap::new();
    let mut passable: Vec<Coords> = (0..params.height as i32)
        .flat_map(|y| (0..params.width as i32).map(move |x| Coords::new(x, y)))
        .filter(|c| costs.is_passable(*c))
        .collect();
    passable.shuffle(&mut rng);
    let mut spots = passable.into_iter();

    let mut next_id = 1;
    for faction in &factions {
        for n in 0..params.divisions_per_faction {
            let Some(coords) = spots.next() else {
                break;
            };
            divisions.insert(
                next_id,
                Division {
                    id: next_id,
                    crisis_id,
                    faction_id: faction.id,
                    name: format!("{} Division {}", ordinal(n + 1), faction.name),
                    coords,
                    units: random_units(&mut rng, &unit_types),
                    route: None,
                },
            );
            next_id += 1;
        }
    }

    let crisis = Crisis {
        id: crisis_id,
        name: params.name.clone(),
        active: true,
        costs,
        factions,
        unit_types,
    };

    let mut dataset = Dataset::new(format!("{}-{}", params.name, seed));
    dataset.id = Uuid::from_bytes(rng.r#gen());
    dataset.created_at = format!(
        "{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    );
    dataset.crises.insert(crisis.id, crisis);
    dataset.divisions = divisions;
    dataset
}

/// Terrain from Perlin noise: the lowest `impassable_ratio` share of cells is
/// water, the rest costs 1 (lowland) up to `max_cost` (highest ridges).
fn generate_costs(bounds: Bounds, seed: u32, params: &ScenarioParams) -> CostGrid {
    let perlin = Perlin::new(seed);
    let scale = 0.12;
    let mut heights: Vec<f64> = Vec::with_capacity(bounds.area());
    for y in 0..bounds.height {
        for x in 0..bounds.width {
            let (fx, fy) = (x as f64 * scale, y as f64 * scale);
            // Roughness blends in a finer octave on top of the broad shape
            let broad = perlin.get([fx, fy]);
            let fine = perlin.get([fx * 4.0 + 17.0, fy * 4.0 + 17.0]);
            heights.push(broad + fine * params.roughness as f64 * 0.5);
        }
    }

    let mut order: Vec<usize> = (0..heights.len()).collect();
    order.sort_by(|&a, &b| heights[a].total_cmp(&heights[b]).then(a.cmp(&b)));

    let water = (heights.len() as f32 * params.impassable_ratio).round() as usize;
    let mut costs = vec![1; heights.len()];
    let land = &order[water..];
    for &idx in &order[..water] {
        costs[idx] = IMPASSABLE;
    }
    // Cost by elevation rank among land cells.
    let steps = (params.max_cost - 1) as usize;
    for (rank, &idx) in land.iter().enumerate() {
        let band = if land.len() > 1 {
            rank * (steps + 1) / land.len()
        } else {
            0
        };
        costs[idx] = 1 + band.min(steps) as i32;
    }

    // Rows and bounds always agree here.
    CostGrid::from_costs(bounds, costs).unwrap_or_else(|_| CostGrid::uniform(bounds, 1))
}

/// Every division gets the first unit type; the others are a coin flip.
fn random_units(rng: &mut impl Rng, unit_types: &[UnitType]) -> Vec<Unit> {
    let mut units = Vec::new();
    for (i, t) in unit_types.iter().enumerate() {
        if i > 0 && rng.r#gen::<f32>() >= 0.5 {
            continue;
        }
        let amount = if i == 0 {
            rng.gen_range(800..2000)
        } else {
            rng.gen_range(50..400)
        };
        units.push(Unit {
            type_id: t.id,
            amount,
        });
    }
    units
}

fn ordinal(n: u32) -> String {
    let suffix = match (n % 10, n % 100) {
        (1, 11) | (2, 12) | (3, 13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{}{}", n, suffix)
}

/// Print a summary of a dataset.
pub fn print_dataset_summary(data: &Dataset) {
    println!("=== Dataset Summary ===");
    println!("Name: {}", data.name);
    println!("ID: {}", data.id);
    println!("Tick: {}", data.tick_count);
    println!("Divisions: {} ({} routed)", data.divisions.len(), data.routed_division_count());

    for crisis in data.crises.values() {
        let bounds = crisis.bounds();
        let passable = crisis.costs.passable_count();
        println!(
            "\nCrisis {} \"{}\"{}",
            crisis.id,
            crisis.name,
            if crisis.active { "" } else { " (inactive)" }
        );
        println!(
            "  Map: {}x{}, {} passable ({:.1}%)",
            bounds.width,
            bounds.height,
            passable,
            passable as f32 / bounds.area().max(1) as f32 * 100.0
        );
        for faction in &crisis.factions {
            let (count, strength) = data
                .divisions_in(crisis.id)
                .filter(|d| d.faction_id == faction.id)
                .fold((0, 0), |(n, s), d| (n + 1, s + d.strength()));
            println!(
                "  {:<20} {:>3} divisions {:>8} troops",
                faction.name, count, strength
            );
        }
    }
}
