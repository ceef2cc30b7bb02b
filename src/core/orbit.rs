//! Orbit arithmetic: year lookup, quantum splitting and orbit start times.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use crate::core::granule::date_dir;
use crate::{Error, Result};

/// First and last orbit of every mission year.
///
/// The 2012/2013 boundary overlaps by a few orbits in the published table;
/// lookups resolve to the earlier year.
const ORBIT_YEARS: [(u16, u32, u32); 16] = [
    (2000, 1000, 5528),
    (2001, 5529, 10844),
    (2002, 10845, 16159),
    (2003, 16160, 21474),
    (2004, 21475, 26804),
    (2005, 26805, 32119),
    (2006, 32120, 37435),
    (2007, 37436, 42750),
    (2008, 42751, 48080),
    (2009, 48081, 53395),
    (2010, 53396, 58711),
    (2011, 58712, 64026),
    (2012, 64027, 69365),
    (2013, 69357, 74671),
    (2014, 74672, 79986),
    (2015, 79987, 85302),
];

/// Year bucket used for archive and checksum layout.
pub fn orbit_year(orbit: u32) -> Result<u16> {
    ORBIT_YEARS
        .iter()
        .find(|(_, first, last)| (*first..=*last).contains(&orbit))
        .map(|(year, _, _)| *year)
        .ok_or(Error::OrbitOutOfRange(orbit))
}

/// Inclusive range of orbits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrbitRange {
    pub start: u32,
    pub end: u32,
}

impl OrbitRange {
    pub fn new(start: u32, end: u32) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidOrbitRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn orbit_count(&self) -> u32 {
        self.end - self.start + 1
    }

    pub fn orbits(&self) -> RangeInclusive<u32> {
        self.start..=self.end
    }

    /// `start_end`, used in job and file names.
    pub fn label(&self) -> String {
        format!("{}_{}", self.start, self.end)
    }

    /// Cut the range into quanta of at most `granularity` orbits. Every
    /// quantum is full except possibly the last.
    pub fn split(&self, granularity: u32) -> Result<Vec<OrbitRange>> {
        if granularity == 0 {
            return Err(Error::Validation("granularity must be at least 1".to_string()));
        }
        let mut quanta = Vec::new();
        let mut start = u64::from(self.start);
        let end = u64::from(self.end);
        while start <= end {
            let last = (start + u64::from(granularity) - 1).min(end);
            // both bounds lie within [self.start, self.end]
            quanta.push(OrbitRange {
                start: start as u32,
                end: last as u32,
            });
            start = last + 1;
        }
        Ok(quanta)
    }
}

impl std::fmt::Display for OrbitRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrbitTime {
    pub path: u32,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const STAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Orbit start and end times, parsed from `orbit path start end` lines.
#[derive(Debug, Clone, Default)]
pub struct OrbitTimes {
    times: HashMap<u32, OrbitTime>,
}

impl OrbitTimes {
    pub fn load(path: &Path) -> Result<Self> {
        Self::parse(&fs::read_to_string(path)?)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut times = HashMap::new();
        for (lineno, line) in text.lines().enumerate() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.is_empty() {
                continue;
            }
            let malformed =
                || Error::Validation(format!("orbit times line {}: {:?}", lineno + 1, line));
            let [orbit, path, start, end] = fields.as_slice() else {
                return Err(malformed());
            };
            let time = OrbitTime {
                path: path.parse().map_err(|_| malformed())?,
                start: NaiveDateTime::parse_from_str(start, TIME_FORMAT).map_err(|_| malformed())?,
                end: NaiveDateTime::parse_from_str(end, TIME_FORMAT).map_err(|_| malformed())?,
            };
            times.insert(orbit.parse().map_err(|_| malformed())?, time);
        }
        Ok(Self { times })
    }

    pub fn get(&self, orbit: u32) -> Option<&OrbitTime> {
        self.times.get(&orbit)
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Start time as `YYYYMMDDhhmmss`.
    pub fn start_stamp(&self, orbit: u32) -> Result<String> {
        self.get(orbit)
            .map(|t| t.start.format(STAMP_FORMAT).to_string())
            .ok_or_else(|| Error::Validation(format!("no start time for orbit {}", orbit)))
    }

    /// `YYYY/MM/DD` of the orbit start.
    pub fn date_dir(&self, orbit: u32) -> Result<PathBuf> {
        Ok(date_dir(&self.start_stamp(orbit)?))
    }
}

/// Product file name for an orbit starting at `stamp`.
pub fn output_file_name(orbit: u32, stamp: &str) -> String {
    format!("TERRA_BF_L1B_O{}_{}_F000_V000.h5", orbit, stamp)
}
