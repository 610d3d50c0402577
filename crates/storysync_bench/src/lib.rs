//! Benchmark utilities.

use rand::distributions::Alphanumeric;
use rand::Rng;
use storysync_protocol::{EntityType, ProjectEntity};
use storysync_testkit::sample_entity;

/// Generates random prose of roughly `len` bytes.
pub fn random_text(len: usize) -> String {
    let mut rng = rand::thread_rng();
    let mut text = String::with_capacity(len);
    while text.len() < len {
        let word_len = rng.gen_range(1..10);
        text.extend((&mut rng).sample_iter(&Alphanumeric).take(word_len).map(char::from));
        text.push(' ');
    }
    text.truncate(len);
    text
}

/// Generates `count` entities of rotating types with `text_len` bytes of
/// text each, IDs starting at 1.
pub fn generate_entities(count: usize, text_len: usize) -> Vec<ProjectEntity> {
    (1..)
        .zip(EntityType::ALL.into_iter().cycle())
        .take(count)
        .map(|(id, ty)| sample_entity(ty, id, &random_text(text_len)))
        .collect()
}
