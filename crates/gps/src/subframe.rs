//! Navigation message subframe assembly.
//!
//! Packs clock, ephemeris, almanac and iono/UTC parameters into the
//! five 10-word LNAV subframes, with the 25-page cycle of subframes 4
//! and 5 expanded into 53 page images per satellite. Words are held
//! left-justified in 30-bit fields; the low six bits carry parity
//! computed over the word chained with the last two bits of the
//! previously transmitted word (IS-GPS-200, 20.3.5).

use std::f64::consts::PI;

use constants::{
    EMPTY_WORD, MAX_SAT, N_DWRD_SBF, N_SBF_PAGE, PARITY_MASKS, POW2_12, POW2_M5,
    POW2_M11, POW2_M19, POW2_M20, POW2_M21, POW2_M23, POW2_M24, POW2_M27,
    POW2_M29, POW2_M30, POW2_M31, POW2_M33, POW2_M38, POW2_M43, POW2_M50,
    POW2_M55, SBF4_SV_ID, SBF5_SV_ID,
};

use crate::{almanac::Almanac, ephemeris::Ephemeris, ionoutc::IonoUtc};

/// Per-channel set of subframe page images.
pub type SubframePages = [[u32; N_DWRD_SBF]; N_SBF_PAGE];

/// Computes the six parity bits of one subframe word.
///
/// `source` carries D29*/D30* of the previous word in bits 31..30, the
/// 24 data bits in 29..6 and zeros in 5..0. With `nib` set (words 2 and
/// 10), bits 23 and 24 are solved so that D29 and D30 come out zero.
/// If D30* is set the data bits are inverted before transmission.
pub fn compute_checksum(source: u32, nib: bool) -> u32 {
    let mut d = source & 0x3FFF_FFC0;
    let d29 = (source >> 31) & 0x1;
    let d30 = (source >> 30) & 0x1;

    if nib {
        // Solve bits 23 and 24 to preserve the parity check with zeros
        // in bits 29 and 30.
        if (d30 + (PARITY_MASKS[4] & d).count_ones()) % 2 != 0 {
            d ^= 0x1 << 6;
        }
        if (d29 + (PARITY_MASKS[5] & d).count_ones()) % 2 != 0 {
            d ^= 0x1 << 7;
        }
    }

    let mut word = d;
    if d30 != 0 {
        word ^= 0x3FFF_FFC0;
    }

    word |= ((d29 + (PARITY_MASKS[0] & d).count_ones()) % 2) << 5;
    word |= ((d30 + (PARITY_MASKS[1] & d).count_ones()) % 2) << 4;
    word |= ((d29 + (PARITY_MASKS[2] & d).count_ones()) % 2) << 3;
    word |= ((d30 + (PARITY_MASKS[3] & d).count_ones()) % 2) << 2;
    word |= ((d30 + (PARITY_MASKS[4] & d).count_ones()) % 2) << 1;
    word |= (d29 + (PARITY_MASKS[5] & d).count_ones()) % 2;

    (word & 0x3FFF_FFFF) | (source & 0xC000_0000)
}

/// Checks the parity bits of a transmitted word whose bits 31..30 hold
/// D29*/D30* of the preceding word.
pub fn validate_parity(word: u32) -> bool {
    let mut w = word;
    // The sign of the data is governed by D30* of the previous word.
    if w & 0x4000_0000 != 0 {
        w ^= 0x3FFF_FFC0;
    }

    let mut parity = 0u32;
    for mask in [
        0xBB1F_3480u32,
        0x5D8F_9A40,
        0xAEC7_CD00,
        0x5763_E680,
        0x6BB1_F340,
        0x8B7A_89C0,
    ] {
        parity = (parity << 1) | ((w & mask) >> 6).count_ones() % 2;
    }
    parity == (word & 0x3F)
}

/// Builds the 53 subframe page images for one satellite.
#[allow(clippy::too_many_lines)]
pub fn eph_to_subframes(
    eph: &Ephemeris,
    ionoutc: &IonoUtc,
    alm: &Almanac,
    sbf: &mut SubframePages,
) {
    // The transmission week number is injected per frame; the packer
    // leaves the field clear.
    let wn = 0u32;
    let toe = (eph.toe.sec / 16.0) as u32;
    let toc = (eph.toc.sec / 16.0) as u32;
    let iode = eph.iode as u32;
    let iodc = eph.iodc as u32;
    let deltan = (eph.deltan / POW2_M43 / PI) as i32;
    let cuc = (eph.cuc / POW2_M29) as i32;
    let cus = (eph.cus / POW2_M29) as i32;
    let cic = (eph.cic / POW2_M29) as i32;
    let cis = (eph.cis / POW2_M29) as i32;
    let crc = (eph.crc / POW2_M5) as i32;
    let crs = (eph.crs / POW2_M5) as i32;
    let ecc = (eph.ecc / POW2_M33) as u32;
    let sqrta = (eph.sqrta / POW2_M19) as u32;
    let m0 = (eph.m0 / POW2_M31 / PI) as i32;
    let omega0 = (eph.omg0 / POW2_M31 / PI) as i32;
    let inc0 = (eph.inc0 / POW2_M31 / PI) as i32;
    let aop = (eph.aop / POW2_M31 / PI) as i32;
    let omegadot = (eph.omgdot / POW2_M43 / PI) as i32;
    let idot = (eph.idot / POW2_M43 / PI) as i32;
    let af0 = (eph.af0 / POW2_M31) as i32;
    let af1 = (eph.af1 / POW2_M43) as i32;
    let af2 = (eph.af2 / POW2_M55) as i32;
    let tgd = (eph.tgd / POW2_M31) as i32;

    let alpha0 = (ionoutc.alpha0 / POW2_M30).round() as i32;
    let alpha1 = (ionoutc.alpha1 / POW2_M27).round() as i32;
    let alpha2 = (ionoutc.alpha2 / POW2_M24).round() as i32;
    let alpha3 = (ionoutc.alpha3 / POW2_M24).round() as i32;
    let beta0 = (ionoutc.beta0 / 2048.0).round() as i32;
    let beta1 = (ionoutc.beta1 / 16384.0).round() as i32;
    let beta2 = (ionoutc.beta2 / 65536.0).round() as i32;
    let beta3 = (ionoutc.beta3 / 65536.0).round() as i32;
    let a0 = (ionoutc.a0 / POW2_M30).round() as i32;
    let a1 = (ionoutc.a1 / POW2_M50).round() as i32;
    let dtls = ionoutc.dtls;
    let tot = (ionoutc.tot / 4096) as u32;
    let wnt = (ionoutc.week_number % 256) as u32;
    let wnlsf = (ionoutc.wnlsf % 256) as u32;
    let dn = ionoutc.day_number as u32;
    let dtlsf = ionoutc.dtlsf;

    let ura = 0u32;
    let data_id = 1u32;

    // Subframe 1
    sbf[0][0] = 0x8B_0000 << 6;
    sbf[0][1] = 0x1 << 8;
    sbf[0][2] = ((wn & 0x3FF) << 20) | (ura << 14) | (((iodc >> 8) & 0x3) << 6);
    sbf[0][3] = 0;
    sbf[0][4] = 0;
    sbf[0][5] = 0;
    sbf[0][6] = (tgd as u32 & 0xFF) << 6;
    sbf[0][7] = ((iodc & 0xFF) << 22) | ((toc & 0xFFFF) << 6);
    sbf[0][8] = ((af2 as u32 & 0xFF) << 22) | ((af1 as u32 & 0xFFFF) << 6);
    sbf[0][9] = (af0 as u32 & 0x3F_FFFF) << 8;

    // Subframe 2
    sbf[1][0] = 0x8B_0000 << 6;
    sbf[1][1] = 0x2 << 8;
    sbf[1][2] = ((iode & 0xFF) << 22) | ((crs as u32 & 0xFFFF) << 6);
    sbf[1][3] = ((deltan as u32 & 0xFFFF) << 14) | (((m0 >> 24) as u32 & 0xFF) << 6);
    sbf[1][4] = (m0 as u32 & 0xFF_FFFF) << 6;
    sbf[1][5] = ((cuc as u32 & 0xFFFF) << 14) | (((ecc >> 24) & 0xFF) << 6);
    sbf[1][6] = (ecc & 0xFF_FFFF) << 6;
    sbf[1][7] = ((cus as u32 & 0xFFFF) << 14) | (((sqrta >> 24) & 0xFF) << 6);
    sbf[1][8] = (sqrta & 0xFF_FFFF) << 6;
    sbf[1][9] = (toe & 0xFFFF) << 14;

    // Subframe 3
    sbf[2][0] = 0x8B_0000 << 6;
    sbf[2][1] = 0x3 << 8;
    sbf[2][2] = ((cic as u32 & 0xFFFF) << 14) | (((omega0 >> 24) as u32 & 0xFF) << 6);
    sbf[2][3] = (omega0 as u32 & 0xFF_FFFF) << 6;
    sbf[2][4] = ((cis as u32 & 0xFFFF) << 14) | (((inc0 >> 24) as u32 & 0xFF) << 6);
    sbf[2][5] = (inc0 as u32 & 0xFF_FFFF) << 6;
    sbf[2][6] = ((crc as u32 & 0xFFFF) << 14) | (((aop >> 24) as u32 & 0xFF) << 6);
    sbf[2][7] = (aop as u32 & 0xFF_FFFF) << 6;
    sbf[2][8] = (omegadot as u32 & 0xFF_FFFF) << 6;
    sbf[2][9] = ((iode & 0xFF) << 22) | ((idot as u32 & 0x3FFF) << 8);

    // Empty all the pages of subframes 4 and 5 with dummy SV filler.
    for i in 0..25 {
        let sv_id = 0u32;

        sbf[3 + i * 2][0] = 0x8B_0000 << 6;
        sbf[3 + i * 2][1] = 0x4 << 8;
        sbf[3 + i * 2][2] = (data_id << 28) | (sv_id << 22) | ((EMPTY_WORD & 0xFFFF) << 6);
        for w in 3..9 {
            sbf[3 + i * 2][w] = (EMPTY_WORD & 0xFF_FFFF) << 6;
        }
        sbf[3 + i * 2][9] = (EMPTY_WORD & 0x3F_FFFF) << 8;

        sbf[4 + i * 2][0] = 0x8B_0000 << 6;
        sbf[4 + i * 2][1] = 0x5 << 8;
        sbf[4 + i * 2][2] = (data_id << 28) | (sv_id << 22) | ((EMPTY_WORD & 0xFFFF) << 6);
        for w in 3..9 {
            sbf[4 + i * 2][w] = (EMPTY_WORD & 0xFF_FFFF) << 6;
        }
        sbf[4 + i * 2][9] = (EMPTY_WORD & 0x3F_FFFF) << 8;
    }

    // Subframe 4, pages 2-5 and 7-10: almanac data for PRN 25 to 32.
    for sv in 24..MAX_SAT {
        let i = if sv <= 27 { sv - 23 } else { sv - 22 };

        if alm.sv[sv].valid {
            let page = &mut sbf[3 + i * 2];
            pack_almanac_page(page, &alm.sv[sv], 0x4, data_id);
        }
    }

    // Subframe 4, page 18: ionospheric and UTC data.
    if ionoutc.vflg {
        let page = &mut sbf[3 + 17 * 2];
        page[0] = 0x8B_0000 << 6;
        page[1] = 0x4 << 8;
        page[2] = (data_id << 28)
            | (SBF4_SV_ID[17] << 22)
            | ((alpha0 as u32 & 0xFF) << 14)
            | ((alpha1 as u32 & 0xFF) << 6);
        page[3] = ((alpha2 as u32 & 0xFF) << 22)
            | ((alpha3 as u32 & 0xFF) << 14)
            | ((beta0 as u32 & 0xFF) << 6);
        page[4] = ((beta1 as u32 & 0xFF) << 22)
            | ((beta2 as u32 & 0xFF) << 14)
            | ((beta3 as u32 & 0xFF) << 6);
        page[5] = (a1 as u32 & 0xFF_FFFF) << 6;
        page[6] = ((a0 >> 8) as u32 & 0xFF_FFFF) << 6;
        page[7] = ((a0 as u32 & 0xFF) << 22) | ((tot & 0xFF) << 14) | ((wnt & 0xFF) << 6);
        page[8] =
            ((dtls as u32 & 0xFF) << 22) | ((wnlsf & 0xFF) << 14) | ((dn & 0xFF) << 6);
        page[9] = (dtlsf as u32 & 0xFF) << 22;
    }

    // Subframe 4, page 25: SV health for PRN 25 to 32, zeroed.
    sbf[3 + 24 * 2][0] = 0x8B_0000 << 6;
    sbf[3 + 24 * 2][1] = 0x4 << 8;
    sbf[3 + 24 * 2][2] = (data_id << 28) | (SBF4_SV_ID[24] << 22);
    for w in 3..10 {
        sbf[3 + 24 * 2][w] = 0;
    }

    // Subframe 5, pages 1-24: almanac data for PRN 1 to 24.
    for sv in 0..24 {
        if alm.sv[sv].valid {
            let page = &mut sbf[4 + sv * 2];
            pack_almanac_page(page, &alm.sv[sv], 0x5, data_id);
        }
    }

    // Subframe 5, page 25: almanac reference time and week.
    let mut wna = (eph.toe.week % 256) as u32;
    let mut toa = (eph.toe.sec / 4096.0) as u32;
    for sv in 0..MAX_SAT {
        if alm.sv[sv].valid {
            wna = (alm.sv[sv].toa.week % 256) as u32;
            toa = (alm.sv[sv].toa.sec / 4096.0) as u32;
            break;
        }
    }

    sbf[4 + 24 * 2][0] = 0x8B_0000 << 6;
    sbf[4 + 24 * 2][1] = 0x5 << 8;
    sbf[4 + 24 * 2][2] =
        (data_id << 28) | (SBF5_SV_ID[24] << 22) | ((toa & 0xFF) << 14) | ((wna & 0xFF) << 6);
    for w in 3..10 {
        sbf[4 + 24 * 2][w] = 0;
    }
}

/// Packs one almanac page of subframe 4 or 5.
fn pack_almanac_page(
    page: &mut [u32; N_DWRD_SBF],
    sv: &crate::almanac::AlmanacSv,
    subframe_id: u32,
    data_id: u32,
) {
    let sv_id = u32::from(sv.svid);
    let ecc = (sv.e / POW2_M21) as u32;
    let toa = (sv.toa.sec / POW2_12) as u32;
    let delta_i = ((sv.delta_i / PI - 0.3) / POW2_M19) as i32;
    let omegadot = (sv.omgdot / PI / POW2_M38) as i32;
    let sqrta = (sv.sqrta / POW2_M11) as u32;
    let omega0 = (sv.omg0 / PI / POW2_M23) as i32;
    let aop = (sv.aop / PI / POW2_M23) as i32;
    let m0 = (sv.m0 / PI / POW2_M23) as i32;
    let af0 = (sv.af0 / POW2_M20) as i32;
    let af1 = (sv.af1 / POW2_M38) as i32;

    page[0] = 0x8B_0000 << 6;
    page[1] = subframe_id << 8;
    page[2] = (data_id << 28) | (sv_id << 22) | ((ecc & 0xFFFF) << 6);
    page[3] = ((toa & 0xFF) << 22) | ((delta_i as u32 & 0xFFFF) << 6);
    // SV health bits left zero: all data OK.
    page[4] = (omegadot as u32 & 0xFFFF) << 14;
    page[5] = (sqrta & 0xFF_FFFF) << 6;
    page[6] = (omega0 as u32 & 0xFF_FFFF) << 6;
    page[7] = (aop as u32 & 0xFF_FFFF) << 6;
    page[8] = (m0 as u32 & 0xFF_FFFF) << 6;
    page[9] = ((af0 as u32 & 0x7F8) << 19)
        | ((af1 as u32 & 0x7FF) << 11)
        | ((af0 as u32 & 0x7) << 8);
}
