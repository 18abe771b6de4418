//! FITS primary header cards.
//!
//! Records are read from and written to files through cfitsio. The structural
//! keywords (`SIMPLE`, `BITPIX`, `NAXIS*`, `EXTEND`) belong to the image being
//! written and are not stored as cards; the axis lengths are kept separately.
//! Every other card is kept verbatim, so a header copied from a data cube
//! reaches a derived file unchanged except for the cards that were edited.
#![allow(clippy::cast_precision_loss)]

use crate::{Error, Result};
use cubemask_core::{Axis, Dims, VoxelCoord};
use fitsio::errors::check_status;
use fitsio::FitsFile;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};

/// Card length in bytes.
pub const CARD_LEN: usize = 80;

/// Cards mapping stored samples to physical values. They only hold for the
/// sample type they were written with.
pub const ENCODING_KEYS: [&str; 3] = ["BSCALE", "BZERO", "BLANK"];

const WCS_KEYS: [&str; 5] = ["CTYPE", "CRVAL", "CRPIX", "CDELT", "CUNIT"];

fn is_structural(keyword: &str) -> bool {
    match keyword {
        "SIMPLE" | "BITPIX" | "NAXIS" | "EXTEND" | "END" => true,
        _ => keyword
            .strip_prefix("NAXIS")
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit())),
    }
}

fn record_keyword(record: &str) -> &str {
    record.get(..8).unwrap_or(record).trim_end()
}

/// One header card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Card {
    keyword: String,
    raw: String,
}

impl Card {
    fn parse(record: &str) -> Result<Self> {
        if record.len() > CARD_LEN || !record.bytes().all(|b| (0x20..=0x7e).contains(&b)) {
            return Err(Error::InvalidFormat(format!(
                "invalid header record {record:?}"
            )));
        }
        Ok(Self {
            keyword: record_keyword(record).to_string(),
            raw: format!("{record:<CARD_LEN$}"),
        })
    }

    fn with_value(keyword: &str, value: &str, comment: Option<&str>) -> Self {
        let mut raw = format!("{keyword:<8}= {value:>20}");
        if let Some(comment) = comment.filter(|c| !c.is_empty()) {
            raw.push_str(" / ");
            raw.push_str(comment);
        }
        raw.truncate(CARD_LEN);
        Self {
            keyword: keyword.to_string(),
            raw: format!("{raw:<CARD_LEN$}"),
        }
    }

    /// Card keyword (trimmed).
    #[must_use]
    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    /// The 80-character card image.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    fn has_value(&self) -> bool {
        &self.raw[8..10] == "= "
    }

    /// Value text with quotes removed for strings, `None` for commentary
    /// cards.
    #[must_use]
    pub fn value(&self) -> Option<String> {
        if !self.has_value() {
            return None;
        }
        let field = self.raw[10..].trim_start();
        if let Some(rest) = field.strip_prefix('\'') {
            let mut out = String::new();
            let mut chars = rest.chars().peekable();
            while let Some(c) = chars.next() {
                if c == '\'' {
                    if chars.peek() == Some(&'\'') {
                        chars.next();
                        out.push('\'');
                    } else {
                        break;
                    }
                } else {
                    out.push(c);
                }
            }
            return Some(out.trim_end().to_string());
        }
        let value = field.split('/').next().unwrap_or("").trim();
        Some(value.to_string())
    }

    /// Comment text after the value, if any.
    #[must_use]
    pub fn comment(&self) -> Option<&str> {
        if !self.has_value() {
            return None;
        }
        let field = &self.raw[10..];
        let start = if field.trim_start().starts_with('\'') {
            // skip past the closing quote of the string value
            let open = field.find('\'')?;
            let bytes = field.as_bytes();
            let mut i = open + 1;
            while i < bytes.len() {
                if bytes[i] == b'\'' {
                    if bytes.get(i + 1) == Some(&b'\'') {
                        i += 2;
                        continue;
                    }
                    break;
                }
                i += 1;
            }
            i + 1
        } else {
            0
        };
        let rest = field.get(start..)?;
        rest.find('/')
            .map(|slash| rest[slash + 1..].trim())
            .filter(|c| !c.is_empty())
    }

    fn renamed(&self, keyword: &str) -> Self {
        Self {
            keyword: keyword.to_string(),
            raw: format!("{keyword:<8}{}", &self.raw[8..]),
        }
    }
}

/// Axis lengths plus the ordered non-structural cards of a primary header.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FitsHeader {
    axes: Vec<usize>,
    cards: Vec<Card>,
}

impl FitsHeader {
    /// Header for an image with the given axis lengths and no other cards.
    #[must_use]
    pub fn new(axes: &[usize]) -> Self {
        Self {
            axes: axes.to_vec(),
            cards: Vec::new(),
        }
    }

    /// Builds a header from header records in file order.
    ///
    /// `NAXIS` and `NAXISn` give the axis lengths; the other structural
    /// records are dropped and reading stops at `END`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFormat`] for a record that is not printable
    /// ASCII or a missing or invalid axis length.
    pub fn from_records<'a, I>(records: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut naxis = None;
        let mut lengths = Vec::new();
        let mut cards = Vec::new();
        for record in records {
            let card = Card::parse(record)?;
            let keyword = card.keyword.clone();
            match keyword.as_str() {
                "END" => break,
                "NAXIS" => naxis = card.value().and_then(|v| v.parse::<usize>().ok()),
                key if is_structural(key) => {
                    if let Some(n) = key.strip_prefix("NAXIS") {
                        let len = card.value().and_then(|v| v.parse::<usize>().ok());
                        lengths.push((n.parse::<usize>().unwrap_or(0), len));
                    }
                }
                _ => cards.push(card),
            }
        }
        let naxis = naxis.ok_or_else(|| Error::InvalidFormat("missing or invalid NAXIS".into()))?;
        let axes = (1..=naxis)
            .map(|n| {
                lengths
                    .iter()
                    .find(|(i, _)| *i == n)
                    .and_then(|(_, len)| *len)
                    .ok_or_else(|| Error::InvalidFormat(format!("missing or invalid NAXIS{n}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { axes, cards })
    }

    /// Reads the primary header of an open file.
    ///
    /// # Errors
    /// [`Error::Fits`] if cfitsio fails, or the errors of
    /// [`FitsHeader::from_records`].
    #[allow(unsafe_code, clippy::cast_sign_loss)]
    pub(crate) fn read_primary(fptr: &mut FitsFile) -> Result<Self> {
        fptr.primary_hdu()?;
        let mut status: c_int = 0;
        let mut count: c_int = 0;
        let mut more: c_int = 0;
        // SAFETY: the handle belongs to `fptr`, which stays open and borrowed
        // for the whole function; record buffers hold a full card plus NUL.
        let raw = unsafe { fptr.as_raw() };
        unsafe { fitsio::sys::ffghsp(raw, &mut count, &mut more, &mut status) };
        check_status(status)?;
        let mut records = Vec::with_capacity(count.max(0) as usize);
        for n in 1..=count {
            let mut buf: [c_char; CARD_LEN + 1] = [0; CARD_LEN + 1];
            unsafe { fitsio::sys::ffgrec(raw, n, buf.as_mut_ptr(), &mut status) };
            check_status(status)?;
            let record = unsafe { CStr::from_ptr(buf.as_ptr()) };
            records.push(record.to_string_lossy().into_owned());
        }
        Self::from_records(records.iter().map(String::as_str))
    }

    /// Replaces every non-structural record of the file's primary header
    /// with this header's cards, in order.
    ///
    /// # Errors
    /// [`Error::Fits`] if cfitsio fails.
    #[allow(unsafe_code)]
    pub(crate) fn write_cards(&self, fptr: &mut FitsFile) -> Result<()> {
        fptr.primary_hdu()?;
        let records = self
            .cards
            .iter()
            .map(|card| {
                CString::new(card.raw.as_str())
                    .map_err(|_| Error::InvalidFormat(format!("card {} holds NUL", card.keyword)))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut status: c_int = 0;
        let mut count: c_int = 0;
        let mut more: c_int = 0;
        // SAFETY: as in `read_primary`; the primary HDU is current.
        let raw = unsafe { fptr.as_raw() };
        unsafe { fitsio::sys::ffghsp(raw, &mut count, &mut more, &mut status) };
        check_status(status)?;
        // cfitsio adds its own commentary when creating an image
        for n in (1..=count).rev() {
            let mut buf: [c_char; CARD_LEN + 1] = [0; CARD_LEN + 1];
            unsafe { fitsio::sys::ffgrec(raw, n, buf.as_mut_ptr(), &mut status) };
            check_status(status)?;
            let record = unsafe { CStr::from_ptr(buf.as_ptr()) }.to_string_lossy();
            if !is_structural(record_keyword(&record)) {
                unsafe { fitsio::sys::ffdrec(raw, n, &mut status) };
                check_status(status)?;
            }
        }
        for record in &records {
            unsafe { fitsio::sys::ffprec(raw, record.as_ptr(), &mut status) };
            check_status(status)?;
        }
        Ok(())
    }

    /// Axis lengths `NAXIS1..NAXISn`.
    #[must_use]
    pub fn axes(&self) -> &[usize] {
        &self.axes
    }

    /// Cube dimensions from the first three axes.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFormat`] for fewer than three axes or a
    /// trailing axis longer than one.
    pub fn dims(&self) -> Result<Dims> {
        let axes = &self.axes;
        if axes.len() < 3 {
            return Err(Error::InvalidFormat(format!(
                "expected a 3D image, found {} axes",
                axes.len()
            )));
        }
        if let Some(extra) = axes[3..].iter().position(|&len| len != 1) {
            return Err(Error::InvalidFormat(format!(
                "axis {} has length {}; only degenerate trailing axes are supported",
                extra + 4,
                axes[extra + 3]
            )));
        }
        let dims = Dims::new(axes[0], axes[1], axes[2]);
        dims.validate()?;
        Ok(dims)
    }

    /// Number of samples the header describes.
    #[must_use]
    pub fn sample_count(&self) -> usize {
        if self.axes.is_empty() {
            0
        } else {
            self.axes.iter().product()
        }
    }

    /// Non-structural cards in order.
    #[must_use]
    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    /// Number of non-structural cards.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    /// True if there are no non-structural cards.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// First card with `keyword`.
    #[must_use]
    pub fn card(&self, keyword: &str) -> Option<&Card> {
        self.cards.iter().find(|c| c.keyword == keyword)
    }

    /// True if a card with `keyword` exists.
    #[must_use]
    pub fn contains(&self, keyword: &str) -> bool {
        self.card(keyword).is_some()
    }

    /// Value of `keyword` as text.
    #[must_use]
    pub fn value(&self, keyword: &str) -> Option<String> {
        self.card(keyword).and_then(Card::value)
    }

    /// String value of `keyword`.
    #[must_use]
    pub fn string_value(&self, keyword: &str) -> Option<String> {
        self.value(keyword)
    }

    /// Integer value of `keyword`.
    #[must_use]
    pub fn int_value(&self, keyword: &str) -> Option<i64> {
        self.value(keyword)?.parse().ok()
    }

    /// Floating-point value of `keyword`; accepts Fortran `D` exponents.
    #[must_use]
    pub fn float_value(&self, keyword: &str) -> Option<f64> {
        self.value(keyword)?.replace(['D', 'd'], "E").parse().ok()
    }

    /// Sets an integer card, replacing an existing one in place.
    pub fn set_int(&mut self, keyword: &str, value: i64) {
        self.set_raw(keyword, &value.to_string());
    }

    /// Sets a floating-point card, replacing an existing one in place.
    pub fn set_float(&mut self, keyword: &str, value: f64) {
        self.set_raw(keyword, &format_float(value));
    }

    /// Sets a string card, replacing an existing one in place.
    pub fn set_string(&mut self, keyword: &str, value: &str) {
        let quoted = format!("'{:<8}'", value.replace('\'', "''"));
        self.set_raw(keyword, &format!("{quoted:<20}"));
    }

    fn set_raw(&mut self, keyword: &str, value: &str) {
        match self.cards.iter_mut().find(|c| c.keyword == keyword) {
            Some(card) => {
                let comment = card.comment().map(str::to_string);
                *card = Card::with_value(keyword, value, comment.as_deref());
            }
            None => self.cards.push(Card::with_value(keyword, value, None)),
        }
    }

    /// Removes every card with `keyword`; returns how many were removed.
    pub fn remove(&mut self, keyword: &str) -> usize {
        let before = self.cards.len();
        self.cards.retain(|c| c.keyword != keyword);
        before - self.cards.len()
    }

    /// Removes the sample encoding cards ([`ENCODING_KEYS`]).
    pub fn strip_encoding(&mut self) {
        self.cards
            .retain(|c| !ENCODING_KEYS.contains(&c.keyword.as_str()));
    }

    /// Rewrites the axis cards for a cropped and downsampled product.
    ///
    /// `origin` is the 0-based source voxel of the product's first voxel,
    /// `factor` the per-axis stride and `dims` the product's size. Reference
    /// pixels shift with the origin and scale with the stride; increments grow
    /// by the stride.
    pub fn subcube(&mut self, origin: VoxelCoord, factor: [usize; 3], dims: Dims) {
        let mut axes = vec![dims.x, dims.y, dims.z];
        axes.extend(self.axes.iter().skip(3));
        self.axes = axes;
        for axis in Axis::ALL {
            let n = axis.index() + 1;
            let f = factor[axis.index()] as f64;
            if let Some(crpix) = self.float_value(&format!("CRPIX{n}")) {
                let shifted = (crpix - origin.get(axis) as f64 - 1.0) / f + 1.0;
                self.set_float(&format!("CRPIX{n}"), shifted);
            }
            if let Some(cdelt) = self.float_value(&format!("CDELT{n}")) {
                self.set_float(&format!("CDELT{n}"), cdelt * f);
            }
            for i in 1..=3 {
                let key = format!("CD{i}_{n}");
                if let Some(cd) = self.float_value(&key) {
                    self.set_float(&key, cd * f);
                }
            }
        }
    }

    /// Rewrites the axis cards for a 2D projection along `axis`.
    ///
    /// The two remaining axes become axes 1 and 2 (in x, y, z order); cards of
    /// the collapsed axis and of any axis beyond the third are dropped.
    pub fn project(&mut self, axis: Axis, width: usize, height: usize) {
        let (a, b) = axis.others();
        let kept = [a.index() + 1, b.index() + 1];
        let naxis = self.axes.len().max(3);

        let mut moved: Vec<Card> = Vec::new();
        for key in WCS_KEYS {
            for (new, &old) in kept.iter().enumerate() {
                if let Some(card) = self.card(&format!("{key}{old}")) {
                    moved.push(card.renamed(&format!("{key}{}", new + 1)));
                }
            }
        }
        for prefix in ["CD", "PC"] {
            for (ni, &oi) in kept.iter().enumerate() {
                for (nj, &oj) in kept.iter().enumerate() {
                    if let Some(card) = self.card(&format!("{prefix}{oi}_{oj}")) {
                        moved.push(card.renamed(&format!("{prefix}{}_{}", ni + 1, nj + 1)));
                    }
                }
            }
        }

        // axis cards go where the first one was
        let insert_at = self
            .cards
            .iter()
            .position(|c| is_axis_card(&c.keyword, naxis))
            .unwrap_or(self.cards.len());
        let mut tail = self.cards.split_off(insert_at);
        tail.retain(|c| !is_axis_card(&c.keyword, naxis));
        self.cards.extend(moved);
        self.cards.extend(tail);
        self.axes = vec![width, height];
    }
}

fn is_axis_card(keyword: &str, naxis: usize) -> bool {
    let indexed = |rest: &str| rest.parse::<usize>().is_ok_and(|n| (1..=naxis).contains(&n));
    for key in WCS_KEYS {
        if let Some(rest) = keyword.strip_prefix(key) {
            if indexed(rest) {
                return true;
            }
        }
    }
    for prefix in ["CD", "PC"] {
        if let Some((i, j)) = keyword.strip_prefix(prefix).and_then(|r| r.split_once('_')) {
            if indexed(i) && indexed(j) {
                return true;
            }
        }
    }
    false
}

fn format_float(value: f64) -> String {
    let text = format!("{value:E}");
    // FITS readers expect a mantissa with a decimal point
    match text.split_once('E') {
        Some((mantissa, exponent)) if !mantissa.contains('.') => format!("{mantissa}.0E{exponent}"),
        _ => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const CUBE_RECORDS: [&str; 15] = [
        "SIMPLE  =                    T",
        "BITPIX  =                  -32 / float data",
        "NAXIS   =                    3",
        "NAXIS1  =                   10",
        "NAXIS2  =                   20",
        "NAXIS3  =                   30",
        "EXTEND  =                    T",
        "CRPIX1  =                 11.0",
        "CDELT1  =              -0.5D-3",
        "CRPIX3  =                  1.0",
        "CDELT3  =                 2.0",
        "CUNIT3  = 'Hz      '           / spectral unit",
        "OBJECT  = 'NGC 4''s disk'",
        "HISTORY made by hand",
        "END",
    ];

    fn cube_header() -> FitsHeader {
        FitsHeader::from_records(CUBE_RECORDS).unwrap()
    }

    #[test]
    fn test_records_split_into_axes_and_cards() {
        let header = cube_header();
        assert_eq!(header.axes(), &[10, 20, 30]);
        assert_eq!(header.dims().unwrap(), Dims::new(10, 20, 30));
        assert_eq!(header.sample_count(), 6000);
        // structural records are not cards
        assert_eq!(header.len(), 7);
        assert!(!header.contains("BITPIX"));
        assert!(!header.contains("EXTEND"));
        assert_eq!(header.cards()[0].raw(), format!("{:<80}", CUBE_RECORDS[7]));
    }

    #[test]
    fn test_values() {
        let header = cube_header();
        assert_relative_eq!(header.float_value("CDELT1").unwrap(), -0.0005);
        assert_eq!(header.string_value("CUNIT3").as_deref(), Some("Hz"));
        assert_eq!(header.string_value("OBJECT").as_deref(), Some("NGC 4's disk"));
        assert_eq!(header.card("CUNIT3").unwrap().comment(), Some("spectral unit"));
        assert_eq!(header.value("HISTORY"), None);
    }

    #[test]
    fn test_set_keeps_position_and_comment() {
        let mut header = cube_header();
        header.set_float("CDELT3", 4.0);
        assert_eq!(header.cards()[3].keyword(), "CDELT3");
        assert_relative_eq!(header.float_value("CDELT3").unwrap(), 4.0);
        header.set_string("CUNIT3", "MHz");
        assert_eq!(header.string_value("CUNIT3").as_deref(), Some("MHz"));
        assert_eq!(header.card("CUNIT3").unwrap().comment(), Some("spectral unit"));
        assert_eq!(header.card("CUNIT3").unwrap().raw().len(), CARD_LEN);

        header.set_string("BUNIT", "Jy/beam");
        assert_eq!(header.cards().last().unwrap().keyword(), "BUNIT");
    }

    #[test]
    fn test_strip_encoding() {
        let mut header = cube_header();
        header.set_float("BSCALE", 0.5);
        header.set_float("BZERO", 10.0);
        header.set_int("BLANK", -32768);
        header.strip_encoding();
        assert_eq!(header, cube_header());
    }

    #[test]
    fn test_rejects_bad_records() {
        assert!(matches!(
            FitsHeader::from_records(["SIMPLE  =                    T", "END"]),
            Err(Error::InvalidFormat(_))
        ));
        assert!(FitsHeader::from_records(["NAXIS   =                    3", "NAXIS1  =   4"]).is_err());
        assert!(FitsHeader::from_records(["NAXIS   =                    0", "OBJECT  = 'caf\u{e9}'"]).is_err());

        assert!(FitsHeader::new(&[4, 4]).dims().is_err());
        assert!(FitsHeader::new(&[4, 4, 4, 2]).dims().is_err());
        assert_eq!(FitsHeader::new(&[4, 4, 4, 1]).dims().unwrap(), Dims::new(4, 4, 4));
    }

    #[test]
    fn test_subcube_updates_axes() {
        let mut header = cube_header();
        header.subcube(VoxelCoord::new(4, 0, 2), [2, 1, 3], Dims::new(3, 20, 9));
        assert_eq!(header.dims().unwrap(), Dims::new(3, 20, 9));
        // source pixel 11 (1-based) is output pixel (11 - 4 - 1) / 2 + 1
        assert_relative_eq!(header.float_value("CRPIX1").unwrap(), 4.0);
        assert_relative_eq!(header.float_value("CDELT1").unwrap(), -0.001);
        assert_relative_eq!(header.float_value("CRPIX3").unwrap(), (1.0 - 2.0 - 1.0) / 3.0 + 1.0);
        assert_relative_eq!(header.float_value("CDELT3").unwrap(), 6.0);
    }

    #[test]
    fn test_project_renumbers_axes() {
        let mut header = cube_header();
        header.project(Axis::Y, 10, 30);
        assert_eq!(header.axes(), &[10, 30]);
        // axis 3 became axis 2
        assert_relative_eq!(header.float_value("CDELT2").unwrap(), 2.0);
        assert_eq!(header.string_value("CUNIT2").as_deref(), Some("Hz"));
        assert!(!header.contains("CDELT3"));
        assert_relative_eq!(header.float_value("CRPIX1").unwrap(), 11.0);
        assert!(header.contains("OBJECT"));
        assert_eq!(header.cards()[0].keyword(), "CRPIX1");
    }
}
