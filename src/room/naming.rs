//! Random display names

use rand::seq::SliceRandom;
use rand::Rng;

const ADJECTIVES: &[&str] = &[
    "able", "agile", "amber", "ancient", "azure", "bold", "brave", "breezy", "bright", "calm",
    "candid", "clever", "cosmic", "crisp", "curious", "daring", "dapper", "eager", "electric",
    "fancy", "fearless", "fierce", "gentle", "gilded", "glad", "golden", "grand", "happy",
    "hidden", "humble", "icy", "jolly", "keen", "kind", "lively", "lucky", "lunar", "mellow",
    "merry", "mighty", "misty", "nimble", "noble", "odd", "patient", "plucky", "polite", "quick",
    "quiet", "rapid", "rustic", "shy", "silent", "silver", "sly", "snowy", "solar", "steady",
    "stormy", "sunny", "swift", "tidy", "upbeat", "vivid", "wandering", "witty", "zesty",
];

const ANIMALS: &[&str] = &[
    "Albatross", "Antelope", "Badger", "Beaver", "Bison", "Bobcat", "Camel", "Caribou", "Cheetah",
    "Cobra", "Condor", "Coyote", "Crane", "Dingo", "Dolphin", "Eagle", "Falcon", "Ferret",
    "Finch", "Fox", "Gazelle", "Gecko", "Heron", "Hyena", "Ibis", "Iguana", "Jackal", "Jaguar",
    "Kestrel", "Koala", "Lemur", "Leopard", "Lynx", "Magpie", "Marmot", "Meerkat", "Mongoose",
    "Moose", "Narwhal", "Ocelot", "Osprey", "Otter", "Owl", "Panda", "Panther", "Pelican",
    "Puffin", "Quail", "Raven", "Salmon", "Seal", "Sparrow", "Stork", "Tapir", "Tiger", "Toucan",
    "Turtle", "Viper", "Walrus", "Weasel", "Whale", "Wolf", "Wombat", "Wren", "Yak", "Zebra",
];

/// Generate a name like `Brave_Otter42`
pub fn random_name() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("quiet");
    let animal = ANIMALS.choose(&mut rng).copied().unwrap_or("Otter");
    let number: u8 = rng.gen_range(0..100);

    format!("{}_{}{}", capitalize(adjective), animal, number)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Pick a name not present in `taken`
///
/// Tries up to `max_attempts` random names, then falls back to a random
/// base with the smallest numeric suffix that is free.
pub fn unique_name<F>(max_attempts: usize, is_taken: F) -> String
where
    F: Fn(&str) -> bool,
{
    for _ in 0..max_attempts {
        let name = random_name();
        if !is_taken(&name) {
            return name;
        }
    }

    let base = random_name();
    let mut suffix: u64 = 2;
    loop {
        let name = format!("{}_{}", base, suffix);
        if !is_taken(&name) {
            return name;
        }
        suffix += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_random_name_shape() {
        for _ in 0..50 {
            let name = random_name();
            let (adjective, rest) = name.split_once('_').unwrap();

            assert!(adjective.chars().next().unwrap().is_uppercase());
            assert!(rest.chars().next().unwrap().is_uppercase());
            let digits: String = rest.chars().filter(|c| c.is_ascii_digit()).collect();
            assert!(!digits.is_empty() && digits.len() <= 2);
        }
    }

    #[test]
    fn test_unique_name_avoids_taken() {
        let mut taken = HashSet::new();
        for _ in 0..200 {
            let name = unique_name(8, |candidate| taken.contains(candidate));
            assert!(taken.insert(name));
        }
    }

    #[test]
    fn test_unique_name_terminates_when_everything_collides() {
        let name = unique_name(4, |candidate| !candidate.ends_with("_5"));

        assert!(name.ends_with("_5"));
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("brave"), "Brave");
        assert_eq!(capitalize(""), "");
    }
}
