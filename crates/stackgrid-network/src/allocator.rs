//! Address-space allocator.
//!
//! Splits one IPv4 block into `zones × tiers` subnets. Subnets are
//! assigned zone-major, tier-minor, in declaration order; each one starts
//! at the next address aligned to its own size, so mixed prefix lengths
//! never overlap. The same inputs always produce the same addresses.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use stackgrid_core::{Subnet, Tier, TierSpec, Zone};
use tracing::debug;

use crate::error::{NetworkError, NetworkResult};

/// The subnets carved out of one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetAllocation {
    block: Ipv4Net,
    zone_count: u8,
    subnets: Vec<Subnet>,
}

impl SubnetAllocation {
    pub fn block(&self) -> Ipv4Net {
        self.block
    }

    pub fn zone_count(&self) -> u8 {
        self.zone_count
    }

    /// All subnets in allocation order.
    pub fn subnets(&self) -> &[Subnet] {
        &self.subnets
    }

    pub fn get(&self, zone: Zone, tier: Tier) -> Option<&Subnet> {
        self.subnets
            .iter()
            .find(|s| s.zone == zone && s.tier == tier)
    }

    /// Subnets of one tier, one per zone, in zone order.
    pub fn in_tier(&self, tier: Tier) -> Vec<Subnet> {
        self.subnets.iter().filter(|s| s.tier == tier).copied().collect()
    }

    pub fn cidrs_in_tier(&self, tier: Tier) -> Vec<Ipv4Net> {
        self.in_tier(tier).into_iter().map(|s| s.cidr).collect()
    }

    pub fn into_subnets(self) -> Vec<Subnet> {
        self.subnets
    }
}

/// Carve `block` into one subnet per (zone, tier).
///
/// Host bits in `block` are ignored. Fails with `InvalidPrefix` when a
/// tier's prefix is not strictly longer than the block's, and with
/// `CapacityExceeded` when the block runs out of aligned space.
pub fn allocate(block: Ipv4Net, zone_count: u8, tiers: &[TierSpec]) -> NetworkResult<SubnetAllocation> {
    if zone_count == 0 || zone_count > Zone::MAX {
        return Err(NetworkError::InvalidZoneCount {
            count: zone_count,
            max: Zone::MAX,
        });
    }

    let block = block.trunc();
    let mut seen = HashSet::new();
    for spec in tiers {
        if !seen.insert(spec.tier) {
            return Err(NetworkError::DuplicateTier(spec.tier));
        }
        if spec.prefix <= block.prefix_len() || spec.prefix > 32 {
            return Err(NetworkError::InvalidPrefix {
                prefix: spec.prefix,
                block_prefix: block.prefix_len(),
            });
        }
    }

    let requested = zone_count as usize * tiers.len();
    let end = u32::from(block.broadcast()) as u64 + 1;
    let mut cursor = u32::from(block.network()) as u64;
    let mut subnets = Vec::with_capacity(requested);

    for zone in Zone::first(zone_count) {
        for spec in tiers {
            let size = 1u64 << (32 - spec.prefix);
            let start = cursor.div_ceil(size) * size;
            if start + size > end {
                return Err(NetworkError::CapacityExceeded {
                    block,
                    requested,
                    allocated: subnets.len(),
                });
            }
            let cidr = Ipv4Net::new(Ipv4Addr::from(start as u32), spec.prefix).map_err(|_| {
                NetworkError::InvalidPrefix {
                    prefix: spec.prefix,
                    block_prefix: block.prefix_len(),
                }
            })?;
            subnets.push(Subnet {
                zone,
                tier: spec.tier,
                cidr,
            });
            cursor = start + size;
        }
    }

    debug!(%block, zones = zone_count, subnets = subnets.len(), "address space allocated");

    Ok(SubnetAllocation {
        block,
        zone_count,
        subnets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> Ipv4Net {
        s.parse().unwrap()
    }

    fn three_tiers(prefix: u8) -> Vec<TierSpec> {
        vec![
            TierSpec::new(Tier::Public, prefix),
            TierSpec::new(Tier::PrivateWithEgress, prefix),
            TierSpec::new(Tier::PrivateIsolated, prefix),
        ]
    }

    fn assert_disjoint_and_contained(alloc: &SubnetAllocation) {
        let subnets = alloc.subnets();
        for (i, a) in subnets.iter().enumerate() {
            assert!(alloc.block().contains(&a.cidr), "{} outside {}", a.cidr, alloc.block());
            for b in &subnets[i + 1..] {
                assert!(
                    !a.cidr.contains(&b.cidr) && !b.cidr.contains(&a.cidr),
                    "{} overlaps {}",
                    a.cidr,
                    b.cidr
                );
            }
        }
    }

    #[test]
    fn zone_major_tier_minor_order() {
        let alloc = allocate(net("10.0.0.0/16"), 2, &three_tiers(24)).unwrap();
        let cidrs: Vec<String> = alloc.subnets().iter().map(|s| s.cidr.to_string()).collect();
        assert_eq!(
            cidrs,
            vec![
                "10.0.0.0/24",
                "10.0.1.0/24",
                "10.0.2.0/24",
                "10.0.3.0/24",
                "10.0.4.0/24",
                "10.0.5.0/24",
            ]
        );
        assert_eq!(alloc.get(Zone(1), Tier::Public).unwrap().cidr, net("10.0.3.0/24"));
        assert_eq!(
            alloc.cidrs_in_tier(Tier::PrivateWithEgress),
            vec![net("10.0.1.0/24"), net("10.0.4.0/24")]
        );
    }

    #[test]
    fn allocation_is_deterministic() {
        let tiers = three_tiers(22);
        let a = allocate(net("10.1.0.0/16"), 3, &tiers).unwrap();
        let b = allocate(net("10.1.0.0/16"), 3, &tiers).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn mixed_prefixes_are_aligned_and_disjoint() {
        let tiers = vec![
            TierSpec::new(Tier::Public, 26),
            TierSpec::new(Tier::PrivateWithEgress, 24),
            TierSpec::new(Tier::PrivateIsolated, 28),
        ];
        let alloc = allocate(net("10.0.0.0/20"), 3, &tiers).unwrap();
        assert_eq!(alloc.subnets().len(), 9);
        assert_disjoint_and_contained(&alloc);

        // Second subnet skips ahead to the next /24 boundary.
        assert_eq!(alloc.subnets()[0].cidr, net("10.0.0.0/26"));
        assert_eq!(alloc.subnets()[1].cidr, net("10.0.1.0/24"));
        assert_eq!(alloc.subnets()[2].cidr, net("10.0.2.0/28"));
    }

    #[test]
    fn disjoint_across_many_shapes() {
        for prefix in 17..=28 {
            for zones in 1..=4 {
                if let Ok(alloc) = allocate(net("172.16.0.0/16"), zones, &three_tiers(prefix)) {
                    assert_eq!(alloc.subnets().len(), zones as usize * 3);
                    assert_disjoint_and_contained(&alloc);
                }
            }
        }
    }

    #[test]
    fn exact_fit_succeeds() {
        // Four /26 in a /24.
        let tiers = vec![
            TierSpec::new(Tier::Public, 26),
            TierSpec::new(Tier::PrivateWithEgress, 26),
        ];
        let alloc = allocate(net("192.168.0.0/24"), 2, &tiers).unwrap();
        assert_eq!(alloc.subnets()[3].cidr, net("192.168.0.192/26"));
    }

    #[test]
    fn capacity_exceeded() {
        // 10.1.0.0/20 holds sixteen /24s.
        let err = allocate(net("10.1.0.0/20"), 6, &three_tiers(24)).unwrap_err();
        assert_eq!(
            err,
            NetworkError::CapacityExceeded {
                block: net("10.1.0.0/20"),
                requested: 18,
                allocated: 16,
            }
        );
    }

    #[test]
    fn invalid_prefix_not_longer_than_block() {
        let err = allocate(net("10.0.0.0/24"), 1, &[TierSpec::new(Tier::Public, 24)]).unwrap_err();
        assert!(matches!(err, NetworkError::InvalidPrefix { prefix: 24, block_prefix: 24 }));

        let err = allocate(net("10.0.0.0/24"), 1, &[TierSpec::new(Tier::Public, 33)]).unwrap_err();
        assert!(matches!(err, NetworkError::InvalidPrefix { prefix: 33, .. }));
    }

    #[test]
    fn duplicate_tier_rejected() {
        let tiers = vec![TierSpec::new(Tier::Public, 24), TierSpec::new(Tier::Public, 25)];
        assert_eq!(
            allocate(net("10.0.0.0/16"), 2, &tiers).unwrap_err(),
            NetworkError::DuplicateTier(Tier::Public)
        );
    }

    #[test]
    fn zone_count_bounds() {
        assert!(matches!(
            allocate(net("10.0.0.0/16"), 0, &three_tiers(24)),
            Err(NetworkError::InvalidZoneCount { count: 0, .. })
        ));
        assert!(matches!(
            allocate(net("10.0.0.0/8"), 27, &three_tiers(24)),
            Err(NetworkError::InvalidZoneCount { count: 27, .. })
        ));
    }

    #[test]
    fn host_bits_are_ignored() {
        let alloc = allocate(net("10.0.7.9/16"), 1, &[TierSpec::new(Tier::Public, 24)]).unwrap();
        assert_eq!(alloc.block(), net("10.0.0.0/16"));
        assert_eq!(alloc.subnets()[0].cidr, net("10.0.0.0/24"));
    }

    #[test]
    fn no_tiers_yields_empty_allocation() {
        let alloc = allocate(net("10.0.0.0/16"), 2, &[]).unwrap();
        assert!(alloc.subnets().is_empty());
    }
}
