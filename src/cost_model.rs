use crate::TrackerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Returned for volume types with no known price so they sort to the top.
pub const UNPRICED_SENTINEL: f64 = 1_000_000.0;

const GP3_BASELINE_IOPS: i64 = 3000;
const GP3_BASELINE_THROUGHPUT: i64 = 125;
const IO2_TIER_SIZE: i64 = 32_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VolumeType {
    Gp2,
    Gp3,
    St1,
    Sc1,
    Io1,
    Io2,
    Standard,
    Other(String),
}

impl FromStr for VolumeType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "gp2" => VolumeType::Gp2,
            "gp3" => VolumeType::Gp3,
            "st1" => VolumeType::St1,
            "sc1" => VolumeType::Sc1,
            "io1" => VolumeType::Io1,
            "io2" => VolumeType::Io2,
            "standard" => VolumeType::Standard,
            other => VolumeType::Other(other.to_string()),
        })
    }
}

impl From<String> for VolumeType {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(t) => t,
            Err(never) => match never {},
        }
    }
}

impl From<VolumeType> for String {
    fn from(t: VolumeType) -> Self {
        t.to_string()
    }
}

impl fmt::Display for VolumeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VolumeType::Gp2 => "gp2",
            VolumeType::Gp3 => "gp3",
            VolumeType::St1 => "st1",
            VolumeType::Sc1 => "sc1",
            VolumeType::Io1 => "io1",
            VolumeType::Io2 => "io2",
            VolumeType::Standard => "standard",
            VolumeType::Other(name) => name,
        };
        f.write_str(name)
    }
}

/// Provisioned shape of an EBS volume, enough to price it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub volume_type: VolumeType,
    pub size_gib: i64,
    pub iops: Option<i64>,
    pub throughput: Option<i64>,
}

impl VolumeSpec {
    pub fn monthly_cost(&self) -> Result<f64, TrackerError> {
        monthly_cost(&self.volume_type, self.iops, self.throughput, self.size_gib)
    }
}

/// Monthly USD cost of an EBS volume.
///
/// Absent IOPS or throughput count as zero. Unrecognized volume types price
/// at [`UNPRICED_SENTINEL`] instead of failing.
pub fn monthly_cost(
    volume_type: &VolumeType,
    iops: Option<i64>,
    throughput: Option<i64>,
    size_gib: i64,
) -> Result<f64, TrackerError> {
    if size_gib <= 0 {
        return Err(TrackerError::InvalidArgument(format!(
            "volume size must be a positive integer, got {}",
            size_gib
        )));
    }

    let size = size_gib as f64;
    let iops = iops.unwrap_or(0);
    let throughput = throughput.unwrap_or(0);

    let cost = match volume_type {
        VolumeType::Gp2 => 0.10 * size,
        VolumeType::Gp3 => {
            let mut cost = 0.08 * size;
            if iops > GP3_BASELINE_IOPS {
                cost += (iops - GP3_BASELINE_IOPS) as f64 * 0.005;
            }
            if throughput > GP3_BASELINE_THROUGHPUT {
                cost += (throughput - GP3_BASELINE_THROUGHPUT) as f64 * 0.04;
            }
            cost
        }
        VolumeType::St1 => 0.045 * size,
        VolumeType::Sc1 => 0.015 * size,
        VolumeType::Io1 => 0.125 * size + 0.065 * iops as f64,
        VolumeType::Io2 => 0.125 * size + io2_iops_cost(iops),
        VolumeType::Standard => 0.05 * size,
        VolumeType::Other(_) => UNPRICED_SENTINEL,
    };

    Ok(cost)
}

fn io2_iops_cost(iops: i64) -> f64 {
    if iops > 2 * IO2_TIER_SIZE {
        IO2_TIER_SIZE as f64 * 0.065
            + IO2_TIER_SIZE as f64 * 0.046
            + (iops - 2 * IO2_TIER_SIZE) as f64 * 0.032
    } else if iops > IO2_TIER_SIZE {
        IO2_TIER_SIZE as f64 * 0.065 + (iops - IO2_TIER_SIZE) as f64 * 0.046
    } else {
        iops as f64 * 0.065
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_gp3_with_extra_iops_and_throughput() {
        let cost = monthly_cost(&VolumeType::Gp3, Some(4000), Some(150), 100).unwrap();
        assert!(approx(cost, 14.0), "got {}", cost);
    }

    #[test]
    fn test_gp3_baseline_has_no_surcharge() {
        let cost = monthly_cost(&VolumeType::Gp3, Some(3000), Some(125), 100).unwrap();
        assert!(approx(cost, 8.0));
        let cost = monthly_cost(&VolumeType::Gp3, None, None, 100).unwrap();
        assert!(approx(cost, 8.0));
    }

    #[test]
    fn test_flat_rate_types() {
        assert!(approx(monthly_cost(&VolumeType::Gp2, None, None, 50).unwrap(), 5.0));
        assert!(approx(monthly_cost(&VolumeType::St1, None, None, 1000).unwrap(), 45.0));
        assert!(approx(monthly_cost(&VolumeType::Sc1, None, None, 1000).unwrap(), 15.0));
        assert!(approx(monthly_cost(&VolumeType::Standard, None, None, 10).unwrap(), 0.5));
    }

    #[test]
    fn test_io1_charges_every_iop() {
        let cost = monthly_cost(&VolumeType::Io1, Some(1000), None, 100).unwrap();
        assert!(approx(cost, 12.5 + 65.0));
    }

    #[test]
    fn test_io2_tiers_are_cumulative() {
        let base = 0.125 * 100.0;
        let low = monthly_cost(&VolumeType::Io2, Some(10_000), None, 100).unwrap();
        assert!(approx(low, base + 650.0));

        let mid = monthly_cost(&VolumeType::Io2, Some(40_000), None, 100).unwrap();
        assert!(approx(mid, base + 32_000.0 * 0.065 + 8_000.0 * 0.046));

        let high = monthly_cost(&VolumeType::Io2, Some(70_000), None, 100).unwrap();
        assert!(approx(
            high,
            base + 32_000.0 * 0.065 + 32_000.0 * 0.046 + 6_000.0 * 0.032
        ));
    }

    #[test]
    fn test_unknown_type_returns_sentinel() {
        let t: VolumeType = "magnetic-x".parse().unwrap();
        assert_eq!(t, VolumeType::Other("magnetic-x".to_string()));
        assert_eq!(monthly_cost(&t, None, None, 1).unwrap(), UNPRICED_SENTINEL);
    }

    #[test]
    fn test_non_positive_size_is_rejected() {
        assert!(matches!(
            monthly_cost(&VolumeType::Gp2, None, None, 0),
            Err(TrackerError::InvalidArgument(_))
        ));
        assert!(matches!(
            monthly_cost(&VolumeType::Gp2, None, None, -5),
            Err(TrackerError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_cost_is_monotonic_in_size_and_iops() {
        let types = [
            VolumeType::Gp2,
            VolumeType::Gp3,
            VolumeType::St1,
            VolumeType::Sc1,
            VolumeType::Io1,
            VolumeType::Io2,
            VolumeType::Standard,
        ];
        for t in &types {
            let mut last = 0.0;
            for size in [1, 2, 10, 100, 1000, 16_384] {
                let cost = monthly_cost(t, Some(5000), Some(200), size).unwrap();
                assert!(cost >= last, "{} not monotonic in size", t);
                last = cost;
            }
        }
        for t in [VolumeType::Gp3, VolumeType::Io1, VolumeType::Io2] {
            let mut last = 0.0;
            for iops in [0, 100, 3000, 3001, 32_000, 32_001, 64_000, 64_001, 256_000] {
                let cost = monthly_cost(&t, Some(iops), Some(125), 100).unwrap();
                assert!(cost >= last, "{} not monotonic in iops", t);
                last = cost;
            }
        }
    }

    #[test]
    fn test_volume_type_round_trips_through_serde() {
        let spec = VolumeSpec {
            volume_type: VolumeType::Io2,
            size_gib: 8,
            iops: Some(100),
            throughput: None,
        };
        let json = serde_json::to_string(&spec).unwrap();
        assert!(json.contains("\"io2\""));
        let back: VolumeSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }
}
