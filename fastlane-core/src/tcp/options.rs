//! TCP option negotiation.
//!
//! Options are parsed straight off the raw option area of an arriving
//! header. MSS and window scale are only honored on SYN segments; the
//! timestamp option additionally updates the echo state mid-connection. A
//! malformed option length stops the scan but does not fail the segment.

use super::{
    parsing::TcpHeader,
    seq::{mod_bounded, Leq},
    tcb::{Flags, Tcb, TcpConfig},
};
use tracing::trace;

pub const OPT_EOL: u8 = 0;
pub const OPT_NOP: u8 = 1;
pub const OPT_MSS: u8 = 2;
pub const OPT_WS: u8 = 3;
pub const OPT_TS: u8 = 8;

pub const OPT_MSS_LEN: usize = 4;
pub const OPT_WS_LEN: usize = 3;
pub const OPT_TS_LEN: usize = 10;

/// The largest shift the window scale option may carry (RFC 7323).
pub const MAX_WND_SHIFT: u8 = 14;

/// Applies the options of an arriving segment to the connection.
pub(crate) fn negotiate(tcb: &mut Tcb, header: &TcpHeader, seg_len: u32) {
    let opts = &header.options;
    let syn = header.ctl.syn();
    let mut i = 0;

    while i < opts.len() {
        match opts[i] {
            OPT_EOL => return,
            OPT_NOP => i += 1,

            OPT_MSS => {
                if i + OPT_MSS_LEN > opts.len() || opts[i + 1] != OPT_MSS_LEN as u8 {
                    trace!("Bad MSS option length");
                    return;
                }
                if syn {
                    let mss = u16::from_be_bytes([opts[i + 2], opts[i + 3]]) as u32;
                    tcb.mss = if mss == 0 || mss > tcb.config.mss {
                        tcb.config.mss
                    } else {
                        mss
                    };
                }
                i += OPT_MSS_LEN;
            }

            OPT_WS => {
                if i + OPT_WS_LEN > opts.len() || opts[i + 1] != OPT_WS_LEN as u8 {
                    trace!("Bad window scale option length");
                    return;
                }
                // Scaling is agreed once, on the SYN, and only if local
                // policy offers it.
                if syn && !tcb.flags.contains(Flags::WND_SCALE) {
                    if let Some(shift) = tcb.config.window_scaling {
                        tcb.snd_scale = opts[i + 2].min(MAX_WND_SHIFT);
                        tcb.rcv_scale = shift.min(MAX_WND_SHIFT);
                        tcb.flags.insert(Flags::WND_SCALE);
                    }
                }
                i += OPT_WS_LEN;
            }

            OPT_TS => {
                if i + OPT_TS_LEN > opts.len() || opts[i + 1] != OPT_TS_LEN as u8 {
                    trace!("Bad timestamp option length");
                    return;
                }
                let tsval =
                    u32::from_be_bytes([opts[i + 2], opts[i + 3], opts[i + 4], opts[i + 5]]);
                if syn {
                    if tcb.config.timestamps {
                        tcb.ts_recent = tsval;
                        tcb.flags.insert(Flags::TIMESTAMP);
                    }
                } else if tcb.flags.contains(Flags::TIMESTAMP)
                    && mod_bounded(
                        header.seq,
                        Leq,
                        tcb.ts_lastacksent,
                        Leq,
                        header.seq.wrapping_add(seg_len),
                    )
                {
                    // Only trust the timestamp if the segment covers the last
                    // acknowledged sequence number
                    tcb.ts_recent = tsval;
                }
                i += OPT_TS_LEN;
            }

            kind => {
                // Unknown option, skip by its stated length
                if i + 1 >= opts.len() || opts[i + 1] == 0 {
                    trace!(kind, "Bad option length");
                    return;
                }
                i += opts[i + 1] as usize;
            }
        }
    }
}

/// Extracts just the timestamp value, for TIME_WAIT reuse checks where no
/// connection state should be touched yet.
pub fn timestamp_value(options: &[u8]) -> Option<u32> {
    let mut i = 0;
    while i < options.len() {
        match options[i] {
            OPT_EOL => return None,
            OPT_NOP => i += 1,
            OPT_TS => {
                if i + OPT_TS_LEN > options.len() || options[i + 1] != OPT_TS_LEN as u8 {
                    return None;
                }
                return Some(u32::from_be_bytes([
                    options[i + 2],
                    options[i + 3],
                    options[i + 4],
                    options[i + 5],
                ]));
            }
            _ => {
                if i + 1 >= options.len() || options[i + 1] == 0 {
                    return None;
                }
                i += options[i + 1] as usize;
            }
        }
    }
    None
}

/// The option area for an outgoing connection request: everything local
/// policy wants to offer.
pub(crate) fn syn_options(config: &TcpConfig, tsval: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(20);
    out.push(OPT_MSS);
    out.push(OPT_MSS_LEN as u8);
    out.extend_from_slice(&(config.mss.min(u16::MAX as u32) as u16).to_be_bytes());
    if let Some(shift) = config.window_scaling {
        out.push(OPT_NOP);
        out.push(OPT_WS);
        out.push(OPT_WS_LEN as u8);
        out.push(shift.min(MAX_WND_SHIFT));
    }
    if config.timestamps {
        out.extend_from_slice(&timestamp_option(tsval, 0));
    }
    while out.len() % 4 != 0 {
        out.push(OPT_NOP);
    }
    out
}

/// The option area for a SYN+ACK: echo only what was negotiated.
pub(crate) fn synack_options(tcb: &Tcb, tsval: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(20);
    out.push(OPT_MSS);
    out.push(OPT_MSS_LEN as u8);
    out.extend_from_slice(&(tcb.config.mss.min(u16::MAX as u32) as u16).to_be_bytes());
    if tcb.flags.contains(Flags::WND_SCALE) {
        out.push(OPT_NOP);
        out.push(OPT_WS);
        out.push(OPT_WS_LEN as u8);
        out.push(tcb.rcv_scale);
    }
    if tcb.flags.contains(Flags::TIMESTAMP) {
        out.extend_from_slice(&timestamp_option(tsval, tcb.ts_recent));
    }
    while out.len() % 4 != 0 {
        out.push(OPT_NOP);
    }
    out
}

/// Builds a padded option area carrying a timestamp, for tests and the
/// transmitter.
pub fn timestamp_option(tsval: u32, tsecr: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(12);
    out.push(OPT_NOP);
    out.push(OPT_NOP);
    out.push(OPT_TS);
    out.push(OPT_TS_LEN as u8);
    out.extend_from_slice(&tsval.to_be_bytes());
    out.extend_from_slice(&tsecr.to_be_bytes());
    out
}
