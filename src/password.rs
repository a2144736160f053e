use std::fmt;
use std::str::FromStr;

use rand::seq::SliceRandom;

use crate::error::{Error, Result};

/// Words the sender draws from when minting a password. Short, lowercase
/// and easy to say out loud over a phone call.
pub const WORDLIST: &[&str] = &[
    "andromeda", "antenna", "aphelion", "apogee", "asteroid", "astral", "aurora",
    "binary", "blazar", "bolide", "borealis", "celestial", "cluster", "comet",
    "corona", "cosmic", "cosmos", "crater", "crescent", "dust", "dwarf",
    "eclipse", "ecliptic", "ejecta", "equinox", "flare", "galaxy", "gamma",
    "gibbous", "gravity", "halo", "helio", "horizon", "ion", "jovian",
    "kelvin", "kuiper", "lagrange", "lunar", "magnetar", "mantle", "meridian",
    "meteor", "meteorite", "moon", "nadir", "nebula", "neutron", "nova",
    "nucleus", "orbit", "parallax", "parsec", "perigee", "photon", "plasma",
    "polaris", "proton", "pulsar", "quark", "quasar", "radiant", "ray",
    "redshift", "rocket", "rover", "satellite", "saturn", "sidereal", "singularity",
    "solstice", "spectrum", "stardust", "stellar", "sunspot", "supernova", "tectonic",
    "telescope", "terra", "tidal", "titan", "transit", "umbra", "vacuum",
    "vega", "velocity", "vertex", "void", "vortex", "wavelength", "zenith",
    "zodiac",
];

/// A transfer password: the numeric id routes at the broker, the full
/// `id-word-word-word` string feeds the key exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Password {
    pub id: u32,
    pub words: [String; 3],
}

impl Password {
    /// Mints a password for a freshly bound session id.
    pub fn generate(id: u32) -> Self {
        let mut rng = rand::thread_rng();
        let pick = |rng: &mut rand::rngs::ThreadRng| {
            WORDLIST
                .choose(rng)
                .expect("wordlist is not empty")
                .to_string()
        };
        Password {
            id,
            words: [pick(&mut rng), pick(&mut rng), pick(&mut rng)],
        }
    }
}

impl fmt::Display for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}",
            self.id, self.words[0], self.words[1], self.words[2]
        )
    }
}

impl FromStr for Password {
    type Err = Error;

    /// Parses `id-w1-w2-w3`. The id is a positive integer without leading
    /// zeros and the words are lowercase ascii letters. Words are not
    /// required to come from [`WORDLIST`]; a mistyped word still parses
    /// and fails later as a wrong password.
    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('-');
        let id_part = parts.next().ok_or(Error::Malformed)?;
        if id_part.is_empty()
            || id_part.starts_with('0')
            || !id_part.chars().all(|c| c.is_ascii_digit())
        {
            return Err(Error::Malformed);
        }
        let id: u32 = id_part.parse().map_err(|_| Error::Malformed)?;

        let mut words = Vec::with_capacity(3);
        for part in parts {
            if part.is_empty() || !part.chars().all(|c| c.is_ascii_lowercase()) {
                return Err(Error::Malformed);
            }
            words.push(part.to_string());
        }
        let words: [String; 3] = words.try_into().map_err(|_| Error::Malformed)?;

        Ok(Password { id, words })
    }
}
