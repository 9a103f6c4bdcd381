//! Metric Channels & Scaling Policy
//!
//! The six metric channels a divergence can contribute to, and the
//! caller-supplied scaling configuration that tunes their relative weight
//! without touching the aggregation algorithm.

use crate::domain::divergence::{DivergenceType, MetricKind, TraceDivergence};
use serde::{Deserialize, Serialize};

/// The six numeric channels every divergence reduces into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricChannel {
    DivergentSections,
    TraceDistance,
    ReturnValue,
    Parameter,
    Coverage,
    MethodCall,
}

impl MetricChannel {
    pub const ALL: [MetricChannel; 6] = [
        MetricChannel::DivergentSections,
        MetricChannel::TraceDistance,
        MetricChannel::ReturnValue,
        MetricChannel::Parameter,
        MetricChannel::Coverage,
        MetricChannel::MethodCall,
    ];
}

/// The channel and raw numeric value a divergence contributes.
/// Count-like divergences contribute 1.0 per occurrence; coverage
/// contributes the execution-count delta; metrics carry their scalar.
pub fn raw_contribution(divergence: &TraceDivergence) -> (MetricChannel, f64) {
    match divergence {
        TraceDivergence::ReturnValue { .. } => (MetricChannel::ReturnValue, 1.0),
        TraceDivergence::Parameter { .. } => (MetricChannel::Parameter, 1.0),
        TraceDivergence::MethodCall { .. } => (MetricChannel::MethodCall, 1.0),
        TraceDivergence::Coverage {
            old_count,
            new_count,
            ..
        } => (
            MetricChannel::Coverage,
            (f64::from(*old_count) - f64::from(*new_count)).abs(),
        ),
        TraceDivergence::Metric { kind, value, .. } => match kind {
            MetricKind::TraceDistance => (MetricChannel::TraceDistance, *value),
            MetricKind::DivergentSections => (MetricChannel::DivergentSections, *value),
        },
    }
}

impl From<MetricChannel> for DivergenceType {
    fn from(channel: MetricChannel) -> Self {
        match channel {
            MetricChannel::DivergentSections => DivergenceType::DivergentSections,
            MetricChannel::TraceDistance => DivergenceType::TraceDistance,
            MetricChannel::ReturnValue => DivergenceType::ReturnValue,
            MetricChannel::Parameter => DivergenceType::Parameter,
            MetricChannel::Coverage => DivergenceType::Coverage,
            MetricChannel::MethodCall => DivergenceType::MethodCall,
        }
    }
}

/// One scale factor per channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelScales {
    pub divergent_sections: f64,
    pub trace_distance: f64,
    pub return_value: f64,
    pub parameter: f64,
    pub coverage: f64,
    pub method_call: f64,
}

impl ChannelScales {
    pub const fn uniform(scale: f64) -> Self {
        Self {
            divergent_sections: scale,
            trace_distance: scale,
            return_value: scale,
            parameter: scale,
            coverage: scale,
            method_call: scale,
        }
    }

    pub fn get(&self, channel: MetricChannel) -> f64 {
        match channel {
            MetricChannel::DivergentSections => self.divergent_sections,
            MetricChannel::TraceDistance => self.trace_distance,
            MetricChannel::ReturnValue => self.return_value,
            MetricChannel::Parameter => self.parameter,
            MetricChannel::Coverage => self.coverage,
            MetricChannel::MethodCall => self.method_call,
        }
    }
}

impl Default for ChannelScales {
    fn default() -> Self {
        Self::uniform(1.0)
    }
}

/// Caller-supplied scaling policy: one configuration record instead of a
/// sprawling getter interface, so it round-trips through a TOML file and
/// is unit-testable in isolation from the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingPolicy {
    /// Replaces the trace-distance scale for a method whose
    /// divergent-sections reduction is zero.
    pub distance_only_trace_distance: f64,
    /// Scale per syntax change at a target.
    pub syntax_change_count: f64,
    /// Scale per syntax change when the change introduces a brand-new class.
    pub new_class_change_count: f64,
    /// Scale for the count of distinctly affected non-local methods.
    pub affected_method_count: f64,
    /// Linear distance weighting added to every non-local channel value:
    /// `distance_base + distance_weight * hops`.
    pub distance_base: f64,
    pub distance_weight: f64,
    /// Scales for divergences anchored at syntactically changed methods.
    pub local: ChannelScales,
    /// Scales for divergences whose impact propagated through calls.
    pub non_local: ChannelScales,
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            distance_only_trace_distance: 0.25,
            syntax_change_count: 1.0,
            new_class_change_count: 0.5,
            affected_method_count: 0.25,
            distance_base: 1.0,
            distance_weight: 0.5,
            local: ChannelScales::uniform(1.0),
            non_local: ChannelScales::uniform(0.5),
        }
    }
}

impl ScalingPolicy {
    /// Scale for one channel, honoring the distance-only special case.
    pub fn channel_scale(
        &self,
        channel: MetricChannel,
        local: bool,
        divergent_sections_avg: f64,
    ) -> f64 {
        if channel == MetricChannel::TraceDistance && divergent_sections_avg == 0.0 {
            return self.distance_only_trace_distance;
        }
        if local {
            self.local.get(channel)
        } else {
            self.non_local.get(channel)
        }
    }

    pub fn distance_term(&self, hops: u32) -> f64 {
        self.distance_base + self.distance_weight * f64::from(hops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::method_data::NodeId;

    #[test]
    fn test_raw_contributions() {
        let coverage = TraceDivergence::Coverage {
            anchor: NodeId(0),
            offset: 4,
            old_count: 2,
            new_count: 5,
        };
        assert_eq!(raw_contribution(&coverage), (MetricChannel::Coverage, 3.0));

        let metric = TraceDivergence::Metric {
            anchor: NodeId(0),
            kind: MetricKind::TraceDistance,
            value: 7.0,
        };
        assert_eq!(
            raw_contribution(&metric),
            (MetricChannel::TraceDistance, 7.0)
        );
    }

    #[test]
    fn test_distance_only_scaler_applies() {
        let policy = ScalingPolicy::default();
        let normal = policy.channel_scale(MetricChannel::TraceDistance, true, 2.0);
        let distance_only = policy.channel_scale(MetricChannel::TraceDistance, true, 0.0);
        assert_eq!(normal, policy.local.trace_distance);
        assert_eq!(distance_only, policy.distance_only_trace_distance);
    }

    #[test]
    fn test_distance_term_is_linear() {
        let policy = ScalingPolicy::default();
        let step = policy.distance_term(3) - policy.distance_term(2);
        assert!((step - policy.distance_weight).abs() < 1e-9);
        assert!((policy.distance_term(0) - policy.distance_base).abs() < 1e-9);
    }

    #[test]
    fn test_policy_toml_round_trip() {
        let policy = ScalingPolicy {
            non_local: ChannelScales::uniform(0.75),
            distance_weight: 2.0,
            ..ScalingPolicy::default()
        };
        let text = toml::to_string(&policy).unwrap();
        let back: ScalingPolicy = toml::from_str(&text).unwrap();
        assert_eq!(back, policy);
    }

    #[test]
    fn test_partial_policy_file_uses_defaults() {
        let back: ScalingPolicy = toml::from_str("distance_weight = 3.0\n").unwrap();
        assert_eq!(back.distance_weight, 3.0);
        assert_eq!(back.local, ChannelScales::uniform(1.0));
    }
}
