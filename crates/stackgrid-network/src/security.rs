//! Security-group policy graph.
//!
//! Groups are declared up front; rules are added per group. The graph
//! derives directed reachability edges `A → B` whenever some rule of `B`
//! admits traffic from group `A`, either by naming it or through a CIDR
//! that overlaps one of `A`'s member subnets.
//!
//! Validation reports every problem it finds instead of stopping at the
//! first one, and never drops a rule on its own.

use std::collections::HashMap;

use ipnet::Ipv4Net;
use serde::Serialize;
use stackgrid_core::{IngressRule, Peer, Protocol, SecurityGroup};
use tracing::debug;

use crate::error::{NetworkError, NetworkResult};

/// A derived reachability edge: members of `from` may open connections
/// to members of `to` on `port`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub port: u16,
    pub protocol: Protocol,
}

/// An edge that must exist for the target group's rule set to be complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequiredEdge {
    pub from: String,
    pub to: String,
    pub port: u16,
    pub protocol: Protocol,
}

/// A problem found by [`SecurityPolicyGraph::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Violation {
    /// A rule sources traffic from a group that was never declared.
    UndeclaredGroupReference { group: String, referenced: String },
    /// The same source/port/protocol appears twice in one group.
    RedundantRule { group: String, rule: IngressRule },
    /// A required edge (e.g. load balancer → compute) is not granted.
    MissingRequiredEdge {
        from: String,
        to: String,
        port: u16,
        protocol: Protocol,
    },
}

impl From<Violation> for NetworkError {
    fn from(v: Violation) -> Self {
        match v {
            Violation::UndeclaredGroupReference { group, referenced } => {
                NetworkError::UndeclaredGroupReference { group, referenced }
            }
            Violation::RedundantRule { group, rule } => NetworkError::RedundantRule {
                group,
                rule: format!("{} {}/{}", rule.source, rule.port, rule.protocol),
            },
            Violation::MissingRequiredEdge {
                from,
                to,
                port,
                protocol,
            } => NetworkError::MissingRequiredEdge {
                from,
                to,
                port,
                protocol,
            },
        }
    }
}

/// Permission graph over the security groups of one topology.
#[derive(Debug, Clone, Default)]
pub struct SecurityPolicyGraph {
    /// Groups in declaration order.
    groups: Vec<SecurityGroup>,
    index: HashMap<String, usize>,
    required: Vec<RequiredEdge>,
}

impl SecurityPolicyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a group, with any rules it already carries.
    pub fn declare_group(&mut self, group: SecurityGroup) -> NetworkResult<()> {
        if self.index.contains_key(&group.name) {
            return Err(NetworkError::DuplicateGroup(group.name));
        }
        self.index.insert(group.name.clone(), self.groups.len());
        self.groups.push(group);
        Ok(())
    }

    /// Append a rule to a declared group.
    ///
    /// The rule's source is not checked here; dangling sources are
    /// reported by [`validate`](Self::validate).
    pub fn add_rule(&mut self, group: &str, rule: IngressRule) -> NetworkResult<()> {
        let idx = *self
            .index
            .get(group)
            .ok_or_else(|| NetworkError::UnknownGroup(group.to_string()))?;
        debug!(%group, source = %rule.source, port = rule.port, "ingress rule added");
        self.groups[idx].rules.push(rule);
        Ok(())
    }

    /// Record that `to` must admit `protocol` traffic from `from` on `port`.
    pub fn require_edge(&mut self, from: &str, to: &str, port: u16, protocol: Protocol) {
        self.required.push(RequiredEdge {
            from: from.to_string(),
            to: to.to_string(),
            port,
            protocol,
        });
    }

    pub fn group(&self, name: &str) -> Option<&SecurityGroup> {
        self.index.get(name).map(|&i| &self.groups[i])
    }

    pub fn groups(&self) -> &[SecurityGroup] {
        &self.groups
    }

    /// All derived reachability edges, ordered by target group then rule.
    pub fn edges(&self) -> Vec<Edge> {
        let mut edges = Vec::new();
        for target in &self.groups {
            for rule in &target.rules {
                for from in self.sources_of(target, rule) {
                    edges.push(Edge {
                        from: from.to_string(),
                        to: target.name.clone(),
                        port: rule.port,
                        protocol: rule.protocol,
                    });
                }
            }
        }
        edges
    }

    /// True when some rule of `to` admits `protocol` traffic from `from` on `port`.
    pub fn can_reach(&self, from: &str, to: &str, port: u16, protocol: Protocol) -> bool {
        let Some(target) = self.group(to) else {
            return false;
        };
        target
            .rules
            .iter()
            .filter(|rule| rule.admits(port, protocol))
            .any(|rule| self.sources_of(target, rule).any(|src| src == from))
    }

    /// True when every required edge into `group` is granted.
    pub fn is_complete(&self, group: &str) -> bool {
        self.required
            .iter()
            .filter(|req| req.to == group)
            .all(|req| self.can_reach(&req.from, &req.to, req.port, req.protocol))
    }

    /// Report dangling references, redundant rules and missing required edges.
    pub fn validate(&self) -> Vec<Violation> {
        let mut violations = Vec::new();

        for group in &self.groups {
            for (i, rule) in group.rules.iter().enumerate() {
                if let Peer::Group(referenced) = &rule.source
                    && !self.index.contains_key(referenced)
                {
                    violations.push(Violation::UndeclaredGroupReference {
                        group: group.name.clone(),
                        referenced: referenced.clone(),
                    });
                }
                if group.rules[..i].iter().any(|prev| prev.same_permission(rule)) {
                    violations.push(Violation::RedundantRule {
                        group: group.name.clone(),
                        rule: rule.clone(),
                    });
                }
            }
        }

        for req in &self.required {
            if !self.can_reach(&req.from, &req.to, req.port, req.protocol) {
                violations.push(Violation::MissingRequiredEdge {
                    from: req.from.clone(),
                    to: req.to.clone(),
                    port: req.port,
                    protocol: req.protocol,
                });
            }
        }

        violations
    }

    /// Like [`validate`](Self::validate), failing on the first violation.
    pub fn ensure_valid(&self) -> NetworkResult<()> {
        match self.validate().into_iter().next() {
            Some(v) => Err(v.into()),
            None => Ok(()),
        }
    }

    /// Declared groups a rule of `target` admits traffic from.
    fn sources_of<'a>(
        &'a self,
        target: &'a SecurityGroup,
        rule: &'a IngressRule,
    ) -> Box<dyn Iterator<Item = &'a str> + 'a> {
        match &rule.source {
            Peer::Group(name) => match self.index.get(name) {
                Some(_) => Box::new(std::iter::once(name.as_str())),
                None => Box::new(std::iter::empty()),
            },
            Peer::Cidr(net) => Box::new(
                self.groups
                    .iter()
                    .filter(move |g| g.name != target.name && members_overlap(&g.members, net))
                    .map(|g| g.name.as_str()),
            ),
        }
    }
}

fn members_overlap(members: &[Ipv4Net], net: &Ipv4Net) -> bool {
    members.iter().any(|m| net.contains(m) || m.contains(net))
}
