//! Korean-locale pseudo-identity generator for the template environment.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const FAMILY_NAMES: &[&str] = &[
    "김", "이", "박", "최", "정", "강", "조", "윤", "장", "임", "한", "오", "서", "신", "권",
];

const GIVEN_SYLLABLES: &[&str] = &[
    "민", "서", "지", "현", "수", "예", "도", "하", "준", "윤", "은", "영", "우", "진", "연", "호",
];

const EMAIL_DOMAINS: &[&str] = &["naver.com", "daum.net", "gmail.com", "kakao.com"];

const EMAIL_LOCAL_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// One pseudo-identity source. Constructed with a seed drawn from the
/// rendering RNG, so each `faker.*()` call in a template gets an
/// independently seeded generator while tests stay reproducible.
pub struct Faker {
    rng: StdRng,
}

impl Faker {
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Family name plus a two-syllable given name.
    pub fn name(&mut self) -> String {
        let family = FAMILY_NAMES[self.rng.gen_range(0..FAMILY_NAMES.len())];
        let first = GIVEN_SYLLABLES[self.rng.gen_range(0..GIVEN_SYLLABLES.len())];
        let second = GIVEN_SYLLABLES[self.rng.gen_range(0..GIVEN_SYLLABLES.len())];
        format!("{}{}{}", family, first, second)
    }

    pub fn email(&mut self) -> String {
        let len = self.rng.gen_range(6..=10);
        let local: String = (0..len)
            .map(|_| EMAIL_LOCAL_CHARS[self.rng.gen_range(0..EMAIL_LOCAL_CHARS.len())] as char)
            .collect();
        let domain = EMAIL_DOMAINS[self.rng.gen_range(0..EMAIL_DOMAINS.len())];
        format!("{}@{}", local, domain)
    }

    /// Mobile number in the `010-XXXX-XXXX` format.
    pub fn phone(&mut self) -> String {
        format!(
            "010-{:04}-{:04}",
            self.rng.gen_range(0..10_000u32),
            self.rng.gen_range(0..10_000u32)
        )
    }
}
