//! EDBG report fragmentation
//!
//! Command packets travel inside fixed 64 octet vendor reports carrying 60
//! octets of payload each. The fragment header octet holds the one-based
//! fragment number in the high nibble and the total fragment count in the
//! low nibble; [`Defrag`] reassembles inbound packets and [`Refrag`] serves
//! the response back in 60 octet chunks as the host polls for it.
//!
// Copyright (C) 2026 Stephan <kiffie@mailbox.org>
// SPDX-License-Identifier: GPL-2.0-or-later

/// Report payload size.
pub const CHUNK: usize = 60;

/// Reassembly accepts at most 9 fragments (540 octets).
pub const MAX_FRAGMENTS: u8 = 9;

/// Payload offset inside a report; octet 3 carries the chunk size.
pub const REPORT_DATA: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DefragStatus {
    /// Bad fragment header or discontinuous sequence.
    Fail,
    /// Fragment stored, more to come.
    Partial,
    /// Packet complete with the contained length.
    Complete(usize),
}

/// Inbound packet reassembly.
pub struct Defrag {
    chunks: u8,
}

impl Defrag {
    pub fn new() -> Defrag {
        Defrag { chunks: 0 }
    }

    /// Store one report into the packet buffer.
    pub fn accept(&mut self, report: &[u8], packet: &mut [u8]) -> DefragStatus {
        let fragment = report[1] >> 4;
        let endfrag = report[1] & 0x0f;
        let size = report[3] as usize;
        if fragment == 0 || fragment > endfrag || endfrag > MAX_FRAGMENTS {
            return DefragStatus::Fail;
        }
        if fragment == 1 {
            self.chunks = 0;
        }
        let offset = (fragment as usize - 1) * CHUNK;
        let take = CHUNK.min(report.len() - REPORT_DATA);
        packet[offset..offset + take].copy_from_slice(&report[REPORT_DATA..REPORT_DATA + take]);
        self.chunks += 1;
        if fragment == endfrag {
            if self.chunks == endfrag {
                DefragStatus::Complete(offset + size.min(CHUNK))
            } else {
                // a fragment was lost; drop the whole packet
                DefragStatus::Fail
            }
        } else {
            DefragStatus::Partial
        }
    }
}

impl Default for Defrag {
    fn default() -> Defrag {
        Defrag::new()
    }
}

/// Outbound response chunking.
pub struct Refrag {
    fragment: u8,
    endfrag: u8,
    remaining: usize,
}

impl Refrag {
    pub fn new() -> Refrag {
        Refrag {
            fragment: 0,
            endfrag: 0,
            remaining: 0,
        }
    }

    /// Arm the chunker for a response of `size` handler octets (the framed
    /// packet is 6 octets longer).
    pub fn begin(&mut self, size: usize) {
        self.fragment = 0;
        self.endfrag = ((size + 65) / 60) as u8;
        self.remaining = size + 6;
    }

    pub fn pending(&self) -> bool {
        self.endfrag != 0
    }

    /// Serve the next chunk of `packet` into a poll reply report. With
    /// nothing pending the reply reports zero fragments.
    pub fn next(&mut self, packet: &[u8], report: &mut [u8; 64]) {
        report[0] = 0x81;
        report[2] = 0;
        if self.endfrag == 0 {
            report[1] = 0;
            report[3] = 0;
            return;
        }
        let offset = self.fragment as usize * CHUNK;
        report[REPORT_DATA..].copy_from_slice(&packet[offset..offset + CHUNK]);
        self.fragment += 1;
        report[1] = (self.fragment << 4) | self.endfrag;
        report[3] = if self.fragment == self.endfrag {
            self.remaining as u8
        } else {
            CHUNK as u8
        };
        self.remaining = self.remaining.saturating_sub(CHUNK);
        if self.fragment == self.endfrag {
            self.endfrag = 0;
        }
    }
}

impl Default for Refrag {
    fn default() -> Refrag {
        Refrag::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::MAX_PACKET;

    fn report(fragment: u8, endfrag: u8, size: u8, fill: u8) -> [u8; 64] {
        let mut r = [0u8; 64];
        r[0] = 0x80;
        r[1] = (fragment << 4) | endfrag;
        r[3] = size;
        for b in r[4..4 + size as usize].iter_mut() {
            *b = fill;
        }
        r
    }

    #[test]
    fn single_fragment_packet() {
        let mut defrag = Defrag::new();
        let mut packet = [0u8; MAX_PACKET];
        let status = defrag.accept(&report(1, 1, 12, 0xa5), &mut packet);
        assert_eq!(status, DefragStatus::Complete(12));
        assert_eq!(packet[11], 0xa5);
    }

    #[test]
    fn multi_fragment_packet() {
        let mut defrag = Defrag::new();
        let mut packet = [0u8; MAX_PACKET];
        assert_eq!(
            defrag.accept(&report(1, 3, 60, 0x11), &mut packet),
            DefragStatus::Partial
        );
        assert_eq!(
            defrag.accept(&report(2, 3, 60, 0x22), &mut packet),
            DefragStatus::Partial
        );
        assert_eq!(
            defrag.accept(&report(3, 3, 17, 0x33), &mut packet),
            DefragStatus::Complete(137)
        );
        assert_eq!(packet[59], 0x11);
        assert_eq!(packet[60], 0x22);
        assert_eq!(packet[136], 0x33);
    }

    #[test]
    fn lost_fragment_is_detected() {
        let mut defrag = Defrag::new();
        let mut packet = [0u8; MAX_PACKET];
        assert_eq!(
            defrag.accept(&report(1, 3, 60, 0), &mut packet),
            DefragStatus::Partial
        );
        // fragment 2 never arrives
        assert_eq!(
            defrag.accept(&report(3, 3, 10, 0), &mut packet),
            DefragStatus::Fail
        );
    }

    #[test]
    fn oversized_packets_are_rejected() {
        let mut defrag = Defrag::new();
        let mut packet = [0u8; MAX_PACKET];
        assert_eq!(
            defrag.accept(&report(1, 10, 60, 0), &mut packet),
            DefragStatus::Fail
        );
        assert_eq!(
            defrag.accept(&report(0, 1, 60, 0), &mut packet),
            DefragStatus::Fail
        );
    }

    #[test]
    fn response_chunking() {
        let mut refrag = Refrag::new();
        let mut packet = [0u8; MAX_PACKET];
        for (i, b) in packet.iter_mut().enumerate() {
            *b = i as u8;
        }
        // 100 handler octets -> 106 octet packet in two chunks
        refrag.begin(100);
        assert!(refrag.pending());
        let mut rep = [0u8; 64];
        refrag.next(&packet, &mut rep);
        assert_eq!(rep[0], 0x81);
        assert_eq!(rep[1], 0x12);
        assert_eq!(rep[3], 60);
        assert_eq!(&rep[4..64], &packet[0..60]);
        refrag.next(&packet, &mut rep);
        assert_eq!(rep[1], 0x22);
        assert_eq!(rep[3], 46);
        assert_eq!(&rep[4..64], &packet[60..120]);
        assert!(!refrag.pending());
        // further polls report an empty response
        refrag.next(&packet, &mut rep);
        assert_eq!(rep[1], 0);
        assert_eq!(rep[3], 0);
    }

    #[test]
    fn minimal_response_is_one_chunk() {
        let mut refrag = Refrag::new();
        let packet = [0u8; MAX_PACKET];
        refrag.begin(0);
        let mut rep = [0u8; 64];
        refrag.next(&packet, &mut rep);
        assert_eq!(rep[1], 0x11);
        assert_eq!(rep[3], 6);
    }
}
