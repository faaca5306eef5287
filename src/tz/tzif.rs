//! Parsing of TZif files (RFC 8536, versions 1 through 3)
use crate::{
    common::{parse::Scan, scalar::*},
    tz::{
        Error,
        posix,
        zone::{TypeRecord, TzAfter, Zone},
    },
};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Copy)]
struct Header {
    version: u8,
    isutcnt: i32,
    isstdcnt: i32,
    leapcnt: i32,
    timecnt: i32,
    typecnt: i32,
    charcnt: i32,
}

/// Decode a complete TZif stream into a zone. For version 2+ files the
/// 32-bit v1 body is skipped and only the 64-bit body is used.
pub(crate) fn parse(bytes: &[u8], key: Option<&str>) -> Result<Zone, Error> {
    let total = bytes.len();
    let mut scan = Scan::new(bytes);
    let header = parse_header(total, &mut scan)?;

    let (header, trans_utc) = if header.version >= 2 {
        // The v1 body size follows from the v1 header counts
        let v1_size = header.timecnt as usize * 5
            + header.typecnt as usize * 6
            + header.charcnt as usize
            + header.leapcnt as usize * 8
            + header.isstdcnt as usize
            + header.isutcnt as usize;
        scan.take(v1_size).ok_or_else(|| short(total, &scan))?;
        // The second header carries its own (usually different) counts
        let header = parse_header(total, &mut scan)?;
        let trans = parse_transitions_64(header.timecnt as usize, total, &mut scan)?;
        (header, trans)
    } else {
        let trans = parse_transitions_32(header.timecnt as usize, total, &mut scan)?;
        (header, trans)
    };

    let type_indices = parse_type_indices(&header, total, &mut scan)?;
    let raw_types = parse_type_records(&header, total, &mut scan)?;
    let abbrs = parse_abbreviations(&header, &raw_types, total, &mut scan)?;

    let dstoffs = infer_dst_offsets(&type_indices, &raw_types);
    let records: Vec<TypeRecord> = raw_types
        .iter()
        .zip(dstoffs)
        .zip(abbrs)
        .map(|((&(utcoff, _, _), dstoff), abbr)| {
            // Differences of in-range offsets always fit an OffsetDelta
            TypeRecord::new(utcoff, OffsetDelta::new_unchecked(dstoff), abbr)
        })
        .collect();
    let types: Vec<TypeRecord> = type_indices
        .iter()
        .map(|&idx| records[idx as usize].clone())
        .collect();

    // The regime before the first transition: the first non-DST type in
    // file order, if any
    let before = raw_types
        .iter()
        .position(|&(_, isdst, _)| !isdst)
        .or(if records.is_empty() { None } else { Some(0) })
        .map(|idx| records[idx].clone())
        .unwrap_or_else(|| TypeRecord::new(Offset::ZERO, OffsetDelta::ZERO, "UTC".into()));

    let rule = if header.version >= 2 {
        parse_footer(&header, total, &mut scan)?
    } else {
        None
    };
    let after = match rule {
        Some(tz) => TzAfter::Rule(tz),
        // No extension rule: the last transition's type governs everything
        // after it (and a transitionless file is a constant-offset zone)
        None => TzAfter::Static(types.last().unwrap_or(&before).clone()),
    };

    let initial = records.first().map(|r| r.utcoff).unwrap_or(Offset::ZERO);
    Ok(Zone {
        key: key.map(str::to_string),
        trans_local: local_index(&trans_utc, &types, initial),
        trans_utc,
        types,
        before,
        after,
    })
}

fn short(total: usize, scan: &Scan) -> Error {
    Error::ShortRead {
        offset: total - scan.len(),
    }
}

fn malformed(total: usize, scan: &Scan, what: &'static str) -> Error {
    Error::MalformedBody {
        offset: total - scan.len(),
        what,
    }
}

fn parse_header(total: usize, s: &mut Scan) -> Result<Header, Error> {
    let magic = s.take(4).ok_or_else(|| short(total, s))?;
    if magic != b"TZif" {
        return Err(Error::BadMagic);
    }
    let version = match s.next().ok_or_else(|| short(total, s))? {
        0 => 1,
        // Later versions are read with the v2/v3 layout; RFC 8536 requires
        // them to stay compatible with it
        n if n.is_ascii_digit() => n - b'0',
        n => return Err(Error::BadVersion(n)),
    };
    s.take(15).ok_or_else(|| short(total, s))?; // reserved
    let content = s.take(24).ok_or_else(|| short(total, s))?;
    let count = |i: usize| i32::from_be_bytes(content[i * 4..(i + 1) * 4].try_into().unwrap());
    let header = Header {
        version,
        isutcnt: count(0),
        isstdcnt: count(1),
        leapcnt: count(2),
        timecnt: count(3),
        typecnt: count(4),
        charcnt: count(5),
    };
    if [
        header.isutcnt,
        header.isstdcnt,
        header.leapcnt,
        header.timecnt,
        header.typecnt,
        header.charcnt,
    ]
    .iter()
    .any(|&n| n < 0)
    {
        return Err(malformed(total, s, "negative header count"));
    }
    Ok(header)
}

fn parse_transitions_64(
    timecnt: usize,
    total: usize,
    s: &mut Scan,
) -> Result<Vec<EpochSecs>, Error> {
    const SIZE: usize = size_of::<i64>();
    let values = s.take(timecnt * SIZE).ok_or_else(|| short(total, s))?;
    // NOTE: we assume the values are sorted, as RFC 8536 requires.
    // Values beyond the supported year range are clamped; results stay
    // correct within the range.
    Ok(values
        .chunks_exact(SIZE)
        .map(|c| EpochSecs::clamp(i64::from_be_bytes(c.try_into().unwrap())))
        .collect())
}

fn parse_transitions_32(
    timecnt: usize,
    total: usize,
    s: &mut Scan,
) -> Result<Vec<EpochSecs>, Error> {
    const SIZE: usize = size_of::<i32>();
    let values = s.take(timecnt * SIZE).ok_or_else(|| short(total, s))?;
    // NOTE: we assume the values are sorted, as RFC 8536 requires.
    Ok(values
        .chunks_exact(SIZE)
        // Safe: i32 is always in range of EpochSecs
        .map(|c| EpochSecs::from_i32(i32::from_be_bytes(c.try_into().unwrap())))
        .collect())
}

fn parse_type_indices(header: &Header, total: usize, s: &mut Scan) -> Result<Vec<u8>, Error> {
    let values = s
        .take(header.timecnt as usize)
        .ok_or_else(|| short(total, s))?;
    if values.iter().any(|&idx| idx as i32 >= header.typecnt) {
        return Err(malformed(total, s, "transition type index out of range"));
    }
    Ok(values.to_vec())
}

/// The six-byte local time type records: (utoff, isdst, abbreviation index)
fn parse_type_records(
    header: &Header,
    total: usize,
    s: &mut Scan,
) -> Result<Vec<(Offset, bool, u8)>, Error> {
    let values = s
        .take(header.typecnt as usize * 6)
        .ok_or_else(|| short(total, s))?;
    values
        .chunks_exact(6)
        .map(|c| {
            let utcoff = Offset::new(i32::from_be_bytes(c[0..4].try_into().unwrap()))
                .ok_or_else(|| malformed(total, s, "UTC offset out of range"))?;
            let abbrind = c[5];
            if abbrind as i32 >= header.charcnt {
                return Err(malformed(total, s, "abbreviation index out of range"));
            }
            Ok((utcoff, c[4] != 0, abbrind))
        })
        .collect()
}

/// The packed abbreviation blob: each type's designation is the
/// null-terminated ASCII run starting at its abbreviation index (which may
/// point into the middle of another designation).
fn parse_abbreviations(
    header: &Header,
    types: &[(Offset, bool, u8)],
    total: usize,
    s: &mut Scan,
) -> Result<Vec<Arc<str>>, Error> {
    let blob = s
        .take(header.charcnt as usize)
        .ok_or_else(|| short(total, s))?;
    if !blob.is_empty() && blob.last() != Some(&0) {
        return Err(malformed(total, s, "abbreviation table not null-terminated"));
    }
    types
        .iter()
        .map(|&(_, _, abbrind)| {
            let run = &blob[abbrind as usize..];
            // Safe: the blob ends in a null, so there's always one to find
            let run = &run[..run.iter().position(|&b| b == 0).unwrap()];
            if !run.is_ascii() {
                return Err(malformed(total, s, "non-ASCII abbreviation"));
            }
            // Safe: confirmed ASCII above
            Ok(std::str::from_utf8(run).unwrap().into())
        })
        .collect()
}

/// Skip the leap-second records and wall/UT indicator metadata, then read
/// the newline-bracketed TZ string. An empty string means no rule.
fn parse_footer(header: &Header, total: usize, s: &mut Scan) -> Result<Option<posix::Tz>, Error> {
    let meta =
        header.isstdcnt as usize + header.isutcnt as usize + header.leapcnt as usize * 12;
    s.take(meta).ok_or_else(|| short(total, s))?;
    match s.next() {
        Some(b'\n') => {}
        Some(_) => return Err(malformed(total, s, "expected newline before TZ string")),
        None => return Err(short(total, s)),
    }
    let raw = match s.take_until(|b| b == b'\n') {
        Some(x) => x,
        None => s.drain(),
    };
    if raw.is_empty() {
        return Ok(None);
    }
    posix::parse(raw)
        .map(Some)
        .ok_or_else(|| Error::BadTzString(String::from_utf8_lossy(raw).into_owned()))
}

/// Derive each type's DST component, which the file format does not record.
///
/// Both the base offset and the DST offset may shift at a single
/// transition, so no single neighbor comparison is always right: prefer
/// the difference from an immediately preceding standard type, then from
/// an immediately following one, and leave the rest for a second look.
fn infer_dst_offsets(type_indices: &[u8], types: &[(Offset, bool, u8)]) -> Vec<i32> {
    let mut dstoffs = vec![0; types.len()];
    let dst_cnt = types.iter().filter(|&&(_, isdst, _)| isdst).count();
    let mut dst_found = 0;

    for i in 1..type_indices.len() {
        if dst_found == dst_cnt {
            break;
        }
        let k = type_indices[i] as usize;
        let (utcoff, isdst, _) = types[k];
        if !isdst || dstoffs[k] != 0 {
            continue;
        }

        let mut dstoff = 0;
        let prev = type_indices[i - 1] as usize;
        if !types[prev].1 {
            dstoff = utcoff.get() - types[prev].0.get();
        }
        if dstoff == 0 && i + 1 < type_indices.len() {
            let next = type_indices[i + 1] as usize;
            if types[next].1 {
                // Sandwiched between DST types; a later transition of the
                // same type may still resolve it
                continue;
            }
            dstoff = utcoff.get() - types[next].0.get();
        }
        if dstoff != 0 {
            dst_found += 1;
            dstoffs[k] = dstoff;
        }
    }

    // Whatever remains unresolved gets the common case: one hour is a far
    // better guess than zero for a type flagged as DST
    for (dstoff, &(_, isdst, _)) in dstoffs.iter_mut().zip(types) {
        if isdst && *dstoff == 0 {
            *dstoff = 3600;
        }
    }
    dstoffs
}

/// Mirror the UTC transition instants into local time, once per fold value,
/// so that civil times can be looked up with a single binary search. Around
/// each transition, the fold=0 sequence jumps at the later of the two local
/// readings of the instant, the fold=1 sequence at the earlier one.
///
/// The first transition mirrors through `initial`, the offset of the
/// file's 0th type record: that is the pre-transition side (typically
/// local mean time), so readings up to the cutover as the *old* clock
/// showed it still resolve to the pre-table record.
pub(crate) fn local_index(
    trans_utc: &[EpochSecs],
    types: &[TypeRecord],
    initial: Offset,
) -> [Vec<EpochSecs>; 2] {
    let mut fold0 = Vec::with_capacity(trans_utc.len());
    let mut fold1 = Vec::with_capacity(trans_utc.len());
    for (i, &utc) in trans_utc.iter().enumerate() {
        let (lo, hi) = if i == 0 {
            (initial, initial)
        } else {
            let prev = types[i - 1].utcoff;
            let curr = types[i].utcoff;
            (prev.min(curr), prev.max(curr))
        };
        fold0.push(utc.saturating_offset(hi));
        fold1.push(utc.saturating_offset(lo));
    }
    [fold0, fold1]
}
