//! 128-dimensional song and taste-profile vectors
//!
//! Layout:
//!
//! | Range       | Meaning                          |
//! |-------------|----------------------------------|
//! | `[0, 64)`   | genre space                      |
//! | `[64, 80)`  | artist fingerprint (hash based)  |
//! | `[80, 96)`  | temporal: decade one-hot + position within decade |
//! | `[96, 112)` | popularity value + bucket one-hot |
//! | `[112, 128)`| source affinity                  |
//!
//! Songs and profiles share the layout so cosine similarity compares like with like.
//! Everything here is pure; randomness lives in [`crate::scoring`].

use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

pub const VECTOR_DIM: usize = 128;

pub const GENRE_START: usize = 0;
pub const GENRE_END: usize = 64;
pub const ARTIST_START: usize = 64;
pub const ARTIST_END: usize = 80;
pub const TEMPORAL_START: usize = 80;
pub const TEMPORAL_END: usize = 96;
pub const ENERGY_START: usize = 96;
pub const ENERGY_END: usize = 112;
pub const SOURCE_START: usize = 112;
pub const SOURCE_END: usize = 128;

/// Weight multiplier for a substring genre match
pub const PARTIAL_GENRE_WEIGHT: f32 = 0.7;
/// Weight multiplier for an unknown genre placed by hash
pub const HASHED_GENRE_WEIGHT: f32 = 0.4;
/// Share of the liked-song centroid blended into a profile
pub const LIKED_CENTROID_WEIGHT: f32 = 0.3;
/// Profile bias toward library picks
pub const LIBRARY_AFFINITY: f32 = 0.4;
/// Profile bias toward similar-track picks
pub const SIMILAR_AFFINITY: f32 = 0.3;

const ARTIST_FINGERPRINT_DIMS: usize = 4;
const DECADE_BUCKETS: usize = 8;
const FIRST_DECADE: i32 = 1950;
const LAST_YEAR: i32 = 2030;

pub type SongVector = [f32; VECTOR_DIM];

/// Genre vocabulary: name or alias to slot in the genre space
///
/// Order matters: substring matching takes the first hit.
const GENRE_TABLE: &[(&str, usize)] = &[
    ("pop", 0), ("dance pop", 0), ("electropop", 0),
    ("rock", 1), ("classic rock", 1),
    ("hip hop", 2), ("hip-hop", 2), ("hiphop", 2),
    ("rap", 3),
    ("r&b", 4), ("rnb", 4), ("r and b", 4), ("rhythm and blues", 4),
    ("electronic", 5), ("electronica", 5),
    ("dance", 6),
    ("edm", 7),
    ("house", 8), ("deep house", 8), ("tech house", 8),
    ("techno", 9),
    ("jazz", 10), ("smooth jazz", 10),
    ("blues", 11),
    ("soul", 12), ("neo-soul", 12), ("neo soul", 12),
    ("funk", 13),
    ("reggae", 14),
    ("country", 15),
    ("folk", 16), ("indie folk", 16),
    ("indie", 17), ("indie rock", 17), ("indie pop", 17),
    ("alternative", 18), ("alt rock", 18),
    ("punk", 19), ("pop punk", 19),
    ("metal", 20), ("heavy metal", 20),
    ("classical", 21),
    ("latin", 22), ("latin pop", 22),
    ("k-pop", 23), ("kpop", 23), ("k pop", 23),
    ("j-pop", 24), ("jpop", 24), ("j pop", 24),
    ("trap", 25),
    ("drill", 26),
    ("afrobeats", 27), ("afrobeat", 27),
    ("reggaeton", 28),
    ("disco", 29),
    ("ambient", 30),
    ("lo-fi", 31), ("lofi", 31), ("lo fi", 31),
    ("chill", 32), ("chillout", 32),
    ("acoustic", 33),
    ("singer-songwriter", 34), ("singer songwriter", 34),
    ("grunge", 35),
    ("emo", 36),
    ("ska", 37),
    ("dub", 38),
    ("dubstep", 39),
    ("trance", 40),
    ("drum and bass", 41), ("dnb", 41), ("d&b", 41),
    ("garage", 42), ("uk garage", 42),
    ("grime", 43),
    ("gospel", 44),
    ("opera", 45),
    ("new wave", 46),
    ("synthpop", 47), ("synth-pop", 47), ("synth pop", 47),
    ("post-punk", 48), ("post punk", 48),
    ("shoegaze", 49),
    ("psychedelic", 50), ("psychedelic rock", 50),
    ("progressive rock", 51), ("prog rock", 51), ("prog", 51),
    ("hard rock", 52),
    ("soft rock", 53),
    ("new age", 54),
    ("world", 55), ("world music", 55),
    ("celtic", 56),
    ("bossa nova", 57),
    ("salsa", 58),
    ("cumbia", 59),
    ("bachata", 60),
    ("dancehall", 61),
    ("soca", 62),
    ("highlife", 63),
];

/// Decade labels to bucket within the temporal space
const DECADE_TABLE: &[(&str, usize)] = &[
    ("1950s", 0), ("50s", 0),
    ("1960s", 1), ("60s", 1),
    ("1970s", 2), ("70s", 2),
    ("1980s", 3), ("80s", 3),
    ("1990s", 4), ("90s", 4),
    ("2000s", 5), ("00s", 5),
    ("2010s", 6), ("10s", 6),
    ("2020s", 7), ("20s", 7),
];

/// Source tag to (offset within source space, confidence)
const SOURCE_TABLE: &[(&str, usize, f32)] = &[
    ("library", 0, 1.0),
    ("similar", 1, 0.85),
    ("artist", 2, 0.75),
    ("wildcard", 3, 0.5),
    ("chart", 4, 0.6),
    ("related", 5, 0.7),
];

static GENRE_INDEX: Lazy<HashMap<&'static str, usize>> =
    Lazy::new(|| GENRE_TABLE.iter().copied().collect());

/// Shortest alias per genre slot, for debug output
static GENRE_NAMES: Lazy<HashMap<usize, &'static str>> = Lazy::new(|| {
    let mut names: HashMap<usize, &'static str> = HashMap::new();
    for &(name, slot) in GENRE_TABLE {
        let entry = names.entry(slot).or_insert(name);
        if name.len() < entry.len() {
            *entry = name;
        }
    }
    names
});

pub fn zero_vector() -> SongVector {
    [0.0; VECTOR_DIM]
}

pub fn magnitude(v: &SongVector) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Genre slot for a lower-cased name, exact or alias match only
pub fn genre_slot(genre: &str) -> Option<usize> {
    GENRE_INDEX.get(genre.trim().to_lowercase().as_str()).copied()
}

/// Decade bucket for labels like "1980s" or "80s"
pub fn decade_bucket(label: &str) -> Option<usize> {
    let label = label.trim().to_lowercase();
    DECADE_TABLE
        .iter()
        .find(|(name, _)| *name == label)
        .map(|&(_, bucket)| bucket)
}

fn sha256_u32(input: &str, chunk: usize) -> u32 {
    let digest = Sha256::digest(input.as_bytes());
    let start = chunk * 4;
    u32::from_be_bytes([digest[start], digest[start + 1], digest[start + 2], digest[start + 3]])
}

/// Fallback slot for an unrecognized genre, stable across calls and processes
pub fn hashed_genre_slot(genre: &str) -> usize {
    let g = genre.trim().to_lowercase();
    GENRE_START + (sha256_u32(&g, 0) as usize) % (GENRE_END - GENRE_START)
}

/// Four artist-space dimensions derived from the normalized name
pub fn artist_dims(artist: &str) -> [usize; ARTIST_FINGERPRINT_DIMS] {
    let name = artist.trim().to_lowercase();
    let width = ARTIST_END - ARTIST_START;
    let mut dims = [0usize; ARTIST_FINGERPRINT_DIMS];
    for (i, dim) in dims.iter_mut().enumerate() {
        *dim = ARTIST_START + (sha256_u32(&name, i) as usize) % width;
    }
    dims
}

fn raise(v: &mut SongVector, idx: usize, value: f32) {
    if value > v[idx] {
        v[idx] = value;
    }
}

fn encode_genre(v: &mut SongVector, genre: &str, weight: f32) {
    let g = genre.trim().to_lowercase();
    if g.is_empty() {
        return;
    }

    if let Some(&slot) = GENRE_INDEX.get(g.as_str()) {
        raise(v, GENRE_START + slot, weight);
        return;
    }

    // "canadian pop" lands on pop, "synth" on synthpop
    if let Some(&(_, slot)) = GENRE_TABLE
        .iter()
        .find(|(key, _)| g.contains(key) || key.contains(g.as_str()))
    {
        raise(v, GENRE_START + slot, weight * PARTIAL_GENRE_WEIGHT);
        return;
    }

    raise(v, hashed_genre_slot(&g), weight * HASHED_GENRE_WEIGHT);
}

fn decade_index(year: i32) -> Option<usize> {
    if !(FIRST_DECADE..=LAST_YEAR).contains(&year) {
        return None;
    }
    Some((((year - FIRST_DECADE) / 10) as usize).min(DECADE_BUCKETS - 1))
}

/// Encode one song's features
///
/// Missing data leaves its dimensions at zero.
pub fn encode_song<S: AsRef<str>>(
    genres: &[S],
    artist: Option<&str>,
    year: Option<i32>,
    popularity: f32,
    source: &str,
) -> SongVector {
    let mut v = zero_vector();

    for genre in genres {
        encode_genre(&mut v, genre.as_ref(), 1.0);
    }

    if let Some(artist) = artist.filter(|a| !a.trim().is_empty()) {
        for dim in artist_dims(artist) {
            v[dim] = 1.0;
        }
    }

    if let Some(year) = year {
        if let Some(idx) = decade_index(year) {
            v[TEMPORAL_START + idx] = 1.0;
            v[TEMPORAL_START + DECADE_BUCKETS + idx] = year.rem_euclid(10) as f32 / 10.0;
        }
    }

    let pop = if popularity.is_finite() { popularity.clamp(0.0, 1.0) } else { 0.5 };
    v[ENERGY_START] = pop;
    let bucket = if pop > 0.8 {
        1
    } else if pop > 0.6 {
        2
    } else if pop > 0.3 {
        3
    } else {
        4
    };
    v[ENERGY_START + bucket] = 1.0;

    if let Some(&(_, offset, confidence)) = SOURCE_TABLE.iter().find(|(tag, _, _)| *tag == source) {
        v[SOURCE_START + offset] = confidence;
    }

    v
}

/// Build a taste profile from declared preferences and liked songs
///
/// Only positive scores contribute. Recomputing with the same inputs gives the same
/// vector regardless of map iteration order.
pub fn build_user_profile(
    genre_scores: &HashMap<String, f64>,
    artist_scores: &HashMap<String, f64>,
    decade_scores: &HashMap<String, f64>,
    liked_vectors: &[SongVector],
) -> SongVector {
    let mut v = zero_vector();

    for (genre, &score) in genre_scores {
        if score > 0.0 {
            encode_genre(&mut v, genre, score as f32);
        }
    }

    for (artist, &score) in artist_scores {
        if score > 0.0 && !artist.trim().is_empty() {
            for dim in artist_dims(artist) {
                raise(&mut v, dim, score as f32);
            }
        }
    }

    for (decade, &score) in decade_scores {
        if score > 0.0 {
            if let Some(bucket) = decade_bucket(decade) {
                raise(&mut v, TEMPORAL_START + bucket, score as f32);
            }
        }
    }

    if !liked_vectors.is_empty() {
        let n = liked_vectors.len() as f32;
        for song in liked_vectors {
            for (acc, x) in v.iter_mut().zip(song.iter()) {
                *acc += x / n * LIKED_CENTROID_WEIGHT;
            }
        }
    }

    v[SOURCE_START] = LIBRARY_AFFINITY;
    v[SOURCE_START + 1] = SIMILAR_AFFINITY;

    v
}

/// One-line summary of the active dimensions, for debug logs
pub fn describe(v: &SongVector) -> String {
    let mut parts = Vec::new();

    let genres: Vec<String> = (GENRE_START..GENRE_END)
        .filter(|&i| v[i] > 0.01)
        .take(8)
        .map(|i| {
            let name = GENRE_NAMES.get(&i).map(|n| n.to_string()).unwrap_or_else(|| format!("g{i}"));
            format!("{}={:.2}", name, v[i])
        })
        .collect();
    if !genres.is_empty() {
        parts.push(format!("genres=[{}]", genres.join(", ")));
    }

    let artist_dims = (ARTIST_START..ARTIST_END).filter(|&i| v[i] > 0.01).count();
    if artist_dims > 0 {
        parts.push(format!("artist_dims={artist_dims}"));
    }

    let eras: Vec<String> = (0..DECADE_BUCKETS)
        .filter(|&b| v[TEMPORAL_START + b] > 0.01)
        .map(|b| {
            let name = DECADE_TABLE
                .iter()
                .find(|(label, bucket)| *bucket == b && label.len() == 3)
                .map(|(label, _)| *label)
                .unwrap_or("?");
            format!("{}={:.2}", name, v[TEMPORAL_START + b])
        })
        .collect();
    if !eras.is_empty() {
        parts.push(format!("era=[{}]", eras.join(", ")));
    }

    if v[ENERGY_START] > 0.01 {
        parts.push(format!("pop={:.2}", v[ENERGY_START]));
    }

    parts.push(format!("||v||={:.3}", magnitude(v)));
    parts.join(" ")
}
