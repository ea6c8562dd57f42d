//! C/A code generation.
//!
//! The coarse/acquisition code of PRN p is a 1023-chip Gold sequence
//! formed from two 10-stage LFSRs; the G2 register output is delayed by
//! a per-PRN chip count before being combined with G1.

use constants::CA_SEQ_LEN;

/// G2 delay per PRN (IS-GPS-200, table 3-I).
const DELAY: [usize; 32] = [
    5, 6, 7, 8, 17, 18, 139, 140, 141, 251, 252, 254, 255, 256, 257, 258, 469,
    470, 471, 472, 473, 474, 509, 512, 513, 514, 515, 516, 859, 860, 861, 862,
];

/// Generates the C/A code chips (0/1) for `prn` in 1..=32.
pub fn generate_ca_code(prn: usize) -> [i32; CA_SEQ_LEN] {
    assert!((1..=32).contains(&prn), "PRN {prn} out of range");

    let mut g1 = [0i32; CA_SEQ_LEN];
    let mut g2 = [0i32; CA_SEQ_LEN];
    let mut r1 = [-1i32; 10];
    let mut r2 = [-1i32; 10];

    for i in 0..CA_SEQ_LEN {
        g1[i] = r1[9];
        g2[i] = r2[9];
        // G1 taps 3, 10; G2 taps 2, 3, 6, 8, 9, 10.
        let c1 = r1[2] * r1[9];
        let c2 = r2[1] * r2[2] * r2[5] * r2[7] * r2[8] * r2[9];

        for j in (1..10).rev() {
            r1[j] = r1[j - 1];
            r2[j] = r2[j - 1];
        }
        r1[0] = c1;
        r2[0] = c2;
    }

    let mut ca = [0i32; CA_SEQ_LEN];
    let mut j = CA_SEQ_LEN - DELAY[prn - 1];
    for (i, chip) in ca.iter_mut().enumerate() {
        *chip = (1 - g1[i] * g2[j % CA_SEQ_LEN]) / 2;
        j += 1;
    }
    ca
}
