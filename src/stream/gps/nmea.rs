//! NMEA 0183 sentence decoding
//!
//! Only the sentence kinds a camera head records are decoded. Unknown
//! sentences and sentences with a bad checksum are ignored.

use std::fmt;

use crate::stream::record::GPS_SENTENCE_KINDS;

/// Sentence kinds with a decoded representation. The order matches the
/// per-frame counter array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NmeaSentenceId {
    Gpgga,
    Gpgsa,
    Gpgsv,
    Gprmc,
    Gpzda,
    Gpvtg,
    Gpgll,
    Gphdt,
    Prdid,
}

impl NmeaSentenceId {
    pub const ALL: [NmeaSentenceId; GPS_SENTENCE_KINDS] = [
        NmeaSentenceId::Gpgga,
        NmeaSentenceId::Gpgsa,
        NmeaSentenceId::Gpgsv,
        NmeaSentenceId::Gprmc,
        NmeaSentenceId::Gpzda,
        NmeaSentenceId::Gpvtg,
        NmeaSentenceId::Gpgll,
        NmeaSentenceId::Gphdt,
        NmeaSentenceId::Prdid,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NmeaSentenceId::Gpgga => "GPGGA",
            NmeaSentenceId::Gpgsa => "GPGSA",
            NmeaSentenceId::Gpgsv => "GPGSV",
            NmeaSentenceId::Gprmc => "GPRMC",
            NmeaSentenceId::Gpzda => "GPZDA",
            NmeaSentenceId::Gpvtg => "GPVTG",
            NmeaSentenceId::Gpgll => "GPGLL",
            NmeaSentenceId::Gphdt => "GPHDT",
            NmeaSentenceId::Prdid => "PRDID",
        }
    }

    /// Position in [`NmeaSentenceId::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    /// Accepts `GPGGA`, other talkers such as `GNGGA`, or the bare `GGA`.
    pub fn parse(tag: &str) -> Option<Self> {
        let tag = tag.trim().to_ascii_uppercase();
        if tag == "PRDID" {
            return Some(NmeaSentenceId::Prdid);
        }
        let kind = match tag.len() {
            3 => tag.as_str(),
            5 => &tag[2..],
            _ => return None,
        };
        match kind {
            "GGA" => Some(NmeaSentenceId::Gpgga),
            "GSA" => Some(NmeaSentenceId::Gpgsa),
            "GSV" => Some(NmeaSentenceId::Gpgsv),
            "RMC" => Some(NmeaSentenceId::Gprmc),
            "ZDA" => Some(NmeaSentenceId::Gpzda),
            "VTG" => Some(NmeaSentenceId::Gpvtg),
            "GLL" => Some(NmeaSentenceId::Gpgll),
            "HDT" => Some(NmeaSentenceId::Gphdt),
            _ => None,
        }
    }
}

impl fmt::Display for NmeaSentenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UtcTime {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    /// Hundredths of a second.
    pub sub_second: u16,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GgaData {
    pub valid: bool,
    pub time: UtcTime,
    pub latitude: f64,
    pub longitude: f64,
    pub quality: u8,
    pub satellites_in_use: u8,
    pub hdop: f64,
    pub altitude: f64,
    pub geoid_height: f64,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GsaData {
    pub valid: bool,
    /// `M`anual or `A`utomatic.
    pub mode: char,
    /// 1 = no fix, 2 = 2D, 3 = 3D.
    pub fix_mode: u8,
    pub satellites_in_solution: Vec<u16>,
    pub pdop: f64,
    pub hdop: f64,
    pub vdop: f64,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SatelliteInfo {
    pub prn: u16,
    pub elevation: u16,
    pub azimuth: u16,
    pub signal_quality: u16,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GsvData {
    pub valid: bool,
    pub total_messages: u8,
    pub satellites_in_view: u16,
    pub satellites: Vec<SatelliteInfo>,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RmcData {
    pub valid: bool,
    pub time: UtcTime,
    /// Receiver status `A` (active).
    pub data_valid: bool,
    pub latitude: f64,
    pub longitude: f64,
    /// Knots.
    pub ground_speed: f64,
    pub course: f64,
    pub day: u8,
    pub month: u8,
    pub year: u16,
    pub magnetic_variation: f64,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ZdaData {
    pub valid: bool,
    pub time: UtcTime,
    pub day: u8,
    pub month: u8,
    pub year: u16,
    pub local_zone_hour: i8,
    pub local_zone_minute: u8,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct VtgData {
    pub valid: bool,
    pub track_true: f64,
    pub track_magnetic: f64,
    pub speed_knots: f64,
    pub speed_kmh: f64,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GllData {
    pub valid: bool,
    pub latitude: f64,
    pub longitude: f64,
    pub time: UtcTime,
    pub data_valid: bool,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct HdtData {
    pub valid: bool,
    pub heading: f64,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PrdidData {
    pub valid: bool,
    pub pitch: f64,
    pub roll: f64,
    pub heading: f64,
    pub count: u32,
}

/// One decoded sentence.
#[derive(Debug, Clone, PartialEq)]
pub enum NmeaSentence {
    Gga(GgaData),
    Gsa(GsaData),
    Gsv(GsvData),
    Rmc(RmcData),
    Zda(ZdaData),
    Vtg(VtgData),
    Gll(GllData),
    Hdt(HdtData),
    Prdid(PrdidData),
}

impl NmeaSentence {
    pub fn id(&self) -> NmeaSentenceId {
        match self {
            NmeaSentence::Gga(_) => NmeaSentenceId::Gpgga,
            NmeaSentence::Gsa(_) => NmeaSentenceId::Gpgsa,
            NmeaSentence::Gsv(_) => NmeaSentenceId::Gpgsv,
            NmeaSentence::Rmc(_) => NmeaSentenceId::Gprmc,
            NmeaSentence::Zda(_) => NmeaSentenceId::Gpzda,
            NmeaSentence::Vtg(_) => NmeaSentenceId::Gpvtg,
            NmeaSentence::Gll(_) => NmeaSentenceId::Gpgll,
            NmeaSentence::Hdt(_) => NmeaSentenceId::Gphdt,
            NmeaSentence::Prdid(_) => NmeaSentenceId::Prdid,
        }
    }

    pub fn is_valid(&self) -> bool {
        match self {
            NmeaSentence::Gga(d) => d.valid,
            NmeaSentence::Gsa(d) => d.valid,
            NmeaSentence::Gsv(d) => d.valid,
            NmeaSentence::Rmc(d) => d.valid,
            NmeaSentence::Zda(d) => d.valid,
            NmeaSentence::Vtg(d) => d.valid,
            NmeaSentence::Gll(d) => d.valid,
            NmeaSentence::Hdt(d) => d.valid,
            NmeaSentence::Prdid(d) => d.valid,
        }
    }
}

/// Every decoded sentence kind of one frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NmeaGpsData {
    pub gga: GgaData,
    pub gsa: GsaData,
    pub gsv: GsvData,
    pub rmc: RmcData,
    pub zda: ZdaData,
    pub vtg: VtgData,
    pub gll: GllData,
    pub hdt: HdtData,
    pub prdid: PrdidData,
}

impl NmeaGpsData {
    /// Decodes every recognised sentence in `text`. When a kind appears
    /// more than once the last occurrence wins, except GSV whose
    /// satellites accumulate across the messages of one cycle.
    pub fn parse(text: &str) -> Self {
        let mut data = Self::default();
        for line in text.lines() {
            let Some(fields) = split_sentence(line) else {
                continue;
            };
            let Some(id) = NmeaSentenceId::parse(fields[0]) else {
                continue;
            };
            let body = &fields[1..];
            match id {
                NmeaSentenceId::Gpgga => data.gga = parse_gga(body),
                NmeaSentenceId::Gpgsa => data.gsa = parse_gsa(body),
                NmeaSentenceId::Gpgsv => parse_gsv(body, &mut data.gsv),
                NmeaSentenceId::Gprmc => data.rmc = parse_rmc(body),
                NmeaSentenceId::Gpzda => data.zda = parse_zda(body),
                NmeaSentenceId::Gpvtg => data.vtg = parse_vtg(body),
                NmeaSentenceId::Gpgll => data.gll = parse_gll(body),
                NmeaSentenceId::Gphdt => data.hdt = parse_hdt(body),
                NmeaSentenceId::Prdid => data.prdid = parse_prdid(body),
            }
        }
        data
    }

    pub fn sentence(&self, id: NmeaSentenceId) -> NmeaSentence {
        match id {
            NmeaSentenceId::Gpgga => NmeaSentence::Gga(self.gga.clone()),
            NmeaSentenceId::Gpgsa => NmeaSentence::Gsa(self.gsa.clone()),
            NmeaSentenceId::Gpgsv => NmeaSentence::Gsv(self.gsv.clone()),
            NmeaSentenceId::Gprmc => NmeaSentence::Rmc(self.rmc.clone()),
            NmeaSentenceId::Gpzda => NmeaSentence::Zda(self.zda.clone()),
            NmeaSentenceId::Gpvtg => NmeaSentence::Vtg(self.vtg.clone()),
            NmeaSentenceId::Gpgll => NmeaSentence::Gll(self.gll.clone()),
            NmeaSentenceId::Gphdt => NmeaSentence::Hdt(self.hdt.clone()),
            NmeaSentenceId::Prdid => NmeaSentence::Prdid(self.prdid.clone()),
        }
    }

    /// Copies the per-kind counters into the decoded structures.
    pub fn apply_counters(&mut self, counters: &[u32; GPS_SENTENCE_KINDS]) {
        self.gga.count = counters[NmeaSentenceId::Gpgga.index()];
        self.gsa.count = counters[NmeaSentenceId::Gpgsa.index()];
        self.gsv.count = counters[NmeaSentenceId::Gpgsv.index()];
        self.rmc.count = counters[NmeaSentenceId::Gprmc.index()];
        self.zda.count = counters[NmeaSentenceId::Gpzda.index()];
        self.vtg.count = counters[NmeaSentenceId::Gpvtg.index()];
        self.gll.count = counters[NmeaSentenceId::Gpgll.index()];
        self.hdt.count = counters[NmeaSentenceId::Gphdt.index()];
        self.prdid.count = counters[NmeaSentenceId::Prdid.index()];
    }

    /// Clears every valid flag.
    pub fn invalidate(&mut self) {
        self.gga.valid = false;
        self.gsa.valid = false;
        self.gsv.valid = false;
        self.rmc.valid = false;
        self.zda.valid = false;
        self.vtg.valid = false;
        self.gll.valid = false;
        self.hdt.valid = false;
        self.prdid.valid = false;
    }

    pub fn any_valid(&self) -> bool {
        NmeaSentenceId::ALL
            .iter()
            .any(|&id| self.sentence(id).is_valid())
    }
}

/// Number of well-formed sentences of each kind in `text`.
pub fn count_sentences(text: &str) -> [u32; GPS_SENTENCE_KINDS] {
    let mut counts = [0u32; GPS_SENTENCE_KINDS];
    for line in text.lines() {
        if let Some(id) = split_sentence(line).and_then(|f| NmeaSentenceId::parse(f[0])) {
            counts[id.index()] += 1;
        }
    }
    counts
}

/// XOR of the bytes between `$` and `*`.
pub fn checksum(body: &str) -> u8 {
    body.bytes().fold(0, |acc, b| acc ^ b)
}

/// Splits `$TAG,a,b*CS` into `[TAG, a, b]`. A checksum, when present,
/// must match.
fn split_sentence(line: &str) -> Option<Vec<&str>> {
    let line = line.trim().strip_prefix('$')?;
    let body = match line.split_once('*') {
        Some((body, cs)) => {
            let expected = u8::from_str_radix(cs.trim(), 16).ok()?;
            if checksum(body) != expected {
                return None;
            }
            body
        }
        None => line,
    };
    let fields: Vec<&str> = body.split(',').collect();
    (!fields[0].is_empty()).then_some(fields)
}

fn field<'a>(fields: &[&'a str], i: usize) -> &'a str {
    fields.get(i).copied().unwrap_or("")
}

fn num<T: std::str::FromStr + Default>(fields: &[&str], i: usize) -> T {
    field(fields, i).trim().parse().unwrap_or_default()
}

fn parse_time(text: &str) -> Option<UtcTime> {
    if text.len() < 6 || !text.is_char_boundary(6) {
        return None;
    }
    let hour = text[0..2].parse().ok()?;
    let minute = text[2..4].parse().ok()?;
    let second = text[4..6].parse().ok()?;
    let sub_second = match text[6..].strip_prefix('.') {
        Some(frac) if !frac.is_empty() => {
            let digits: String = frac.chars().chain("00".chars()).take(2).collect();
            digits.parse().ok()?
        }
        _ => 0,
    };
    Some(UtcTime {
        hour,
        minute,
        second,
        sub_second,
    })
}

/// `ddmm.mmmm` plus hemisphere into signed decimal degrees.
fn parse_coordinate(value: &str, hemisphere: &str) -> Option<f64> {
    let raw: f64 = value.trim().parse().ok()?;
    let degrees = (raw / 100.0).trunc();
    let minutes = raw - degrees * 100.0;
    let decimal = degrees + minutes / 60.0;
    match hemisphere.trim() {
        "N" | "E" => Some(decimal),
        "S" | "W" => Some(-decimal),
        _ => None,
    }
}

fn parse_gga(f: &[&str]) -> GgaData {
    let time = parse_time(field(f, 0));
    let latitude = parse_coordinate(field(f, 1), field(f, 2));
    let longitude = parse_coordinate(field(f, 3), field(f, 4));
    let quality: u8 = num(f, 5);
    GgaData {
        valid: time.is_some() && latitude.is_some() && longitude.is_some() && quality > 0,
        time: time.unwrap_or_default(),
        latitude: latitude.unwrap_or_default(),
        longitude: longitude.unwrap_or_default(),
        quality,
        satellites_in_use: num(f, 6),
        hdop: num(f, 7),
        altitude: num(f, 8),
        geoid_height: num(f, 10),
        count: 0,
    }
}

fn parse_gsa(f: &[&str]) -> GsaData {
    let fix_mode: u8 = num(f, 1);
    GsaData {
        valid: fix_mode >= 2,
        mode: field(f, 0).chars().next().unwrap_or(' '),
        fix_mode,
        satellites_in_solution: (2..14)
            .filter_map(|i| field(f, i).trim().parse().ok())
            .collect(),
        pdop: num(f, 14),
        hdop: num(f, 15),
        vdop: num(f, 16),
        count: 0,
    }
}

fn parse_gsv(f: &[&str], gsv: &mut GsvData) {
    let total_messages: u8 = num(f, 0);
    let message: u8 = num(f, 1);
    if total_messages == 0 || message == 0 {
        return;
    }
    if message == 1 {
        gsv.satellites.clear();
    }
    gsv.total_messages = total_messages;
    gsv.satellites_in_view = num(f, 2);
    for chunk in f.get(3..).unwrap_or_default().chunks(4) {
        let Ok(prn) = field(chunk, 0).trim().parse() else {
            continue;
        };
        gsv.satellites.push(SatelliteInfo {
            prn,
            elevation: num(chunk, 1),
            azimuth: num(chunk, 2),
            signal_quality: num(chunk, 3),
        });
    }
    gsv.valid = message == total_messages;
}

fn parse_date(text: &str) -> Option<(u8, u8, u16)> {
    if text.len() != 6 || !text.is_ascii() {
        return None;
    }
    let day = text[0..2].parse().ok()?;
    let month = text[2..4].parse().ok()?;
    let year: u16 = text[4..6].parse().ok()?;
    let century = if year < 80 { 2000 } else { 1900 };
    Some((day, month, century + year))
}

fn parse_rmc(f: &[&str]) -> RmcData {
    let time = parse_time(field(f, 0));
    let data_valid = field(f, 1) == "A";
    let latitude = parse_coordinate(field(f, 2), field(f, 3));
    let longitude = parse_coordinate(field(f, 4), field(f, 5));
    let (day, month, year) = parse_date(field(f, 8)).unwrap_or_default();
    let mut magnetic_variation: f64 = num(f, 9);
    if field(f, 10) == "W" {
        magnetic_variation = -magnetic_variation;
    }
    RmcData {
        valid: time.is_some() && data_valid && latitude.is_some() && longitude.is_some(),
        time: time.unwrap_or_default(),
        data_valid,
        latitude: latitude.unwrap_or_default(),
        longitude: longitude.unwrap_or_default(),
        ground_speed: num(f, 6),
        course: num(f, 7),
        day,
        month,
        year,
        magnetic_variation,
        count: 0,
    }
}

fn parse_zda(f: &[&str]) -> ZdaData {
    let time = parse_time(field(f, 0));
    let day: u8 = num(f, 1);
    let month: u8 = num(f, 2);
    let year: u16 = num(f, 3);
    ZdaData {
        valid: time.is_some() && day > 0 && month > 0 && year > 0,
        time: time.unwrap_or_default(),
        day,
        month,
        year,
        local_zone_hour: num(f, 4),
        local_zone_minute: num(f, 5),
        count: 0,
    }
}

fn parse_vtg(f: &[&str]) -> VtgData {
    VtgData {
        valid: !field(f, 0).is_empty() || !field(f, 6).is_empty(),
        track_true: num(f, 0),
        track_magnetic: num(f, 2),
        speed_knots: num(f, 4),
        speed_kmh: num(f, 6),
        count: 0,
    }
}

fn parse_gll(f: &[&str]) -> GllData {
    let latitude = parse_coordinate(field(f, 0), field(f, 1));
    let longitude = parse_coordinate(field(f, 2), field(f, 3));
    let time = parse_time(field(f, 4));
    let data_valid = field(f, 5) == "A";
    GllData {
        valid: latitude.is_some() && longitude.is_some() && data_valid,
        latitude: latitude.unwrap_or_default(),
        longitude: longitude.unwrap_or_default(),
        time: time.unwrap_or_default(),
        data_valid,
        count: 0,
    }
}

fn parse_hdt(f: &[&str]) -> HdtData {
    let heading = field(f, 0).trim().parse::<f64>();
    HdtData {
        valid: heading.is_ok(),
        heading: heading.unwrap_or_default(),
        count: 0,
    }
}

fn parse_prdid(f: &[&str]) -> PrdidData {
    let values: Vec<Option<f64>> = (0..3).map(|i| field(f, i).trim().parse().ok()).collect();
    PrdidData {
        valid: values.iter().all(Option::is_some),
        pitch: values[0].unwrap_or_default(),
        roll: values[1].unwrap_or_default(),
        heading: values[2].unwrap_or_default(),
        count: 0,
    }
}
