//! records this router originates: router, network, summary and external records,
//! their refresh and flushing, and the per-record aging timer.
use std::{
    collections::{BTreeMap, BTreeSet},
    net,
    time::Duration,
};

use tracing::{debug, info, trace};

use super::{Rde, RdeMessage, RdeTimer};
use crate::{
    config::{RedistributeKind, RedistributeRule},
    engine::EngineMessage,
    fib::{Kroute, RouteOrigin},
    lsa::{
        self, router::ROUTER_FLAG_B, router::ROUTER_FLAG_E, Body, ExternalLsa, Lsa, LsaKey,
        SummaryLsa, InitialSequenceNumber, LSInfinity, LSRefreshTime, MaxAge,
        MaxSequenceNumber, MinLSInterval,
    },
    rtable::{graph::router_key, DestinationType, PathType, Route},
    util,
};

/// a MaxAge record still needed by an exchange is looked at again after this
const MAXAGE_RECHECK: Duration = Duration::from_secs(1);

impl Rde {
    /// attached to more than one running area
    pub(crate) fn is_border(&self) -> bool {
        self.areas.values().filter(|a| a.is_active()).count() > 1
    }

    pub(crate) fn is_asbr(&self) -> bool {
        !self.external_wanted.is_empty()
    }

    /// # desired
    /// the body this router wants for `key` right now, None when the record
    /// should not exist
    fn desired(&self, scope: Option<net::Ipv4Addr>, key: &LsaKey) -> Option<Body> {
        if key.adv_rtr != self.router_id {
            return None;
        }
        let Some(area_id) = scope else {
            return self.external_wanted.get(key).cloned();
        };
        let area = self.areas.get(&area_id)?;
        match key.ls_type {
            lsa::ROUTER_LSA_TYPE if key.ls_id == self.router_id => {
                if !area.is_active() {
                    return None;
                }
                let mut flags = 0;
                if self.is_border() {
                    flags |= ROUTER_FLAG_B;
                }
                if self.is_asbr() && !area.stub {
                    flags |= ROUTER_FLAG_E;
                }
                Some(Body::Router(area.router_lsa(flags, self.neighbors.values())))
            }
            lsa::NETWORK_LSA_TYPE => area
                .network_lsa(self.router_id, key.ls_id, self.neighbors.values())
                .map(Body::Network),
            lsa::SUMMARY_NETWORK_LSA_TYPE | lsa::SUMMARY_ROUTER_LSA_TYPE => {
                area.summaries.get(key).cloned()
            }
            _ => None,
        }
    }

    fn options(&self, scope: Option<net::Ipv4Addr>) -> u8 {
        match scope.and_then(|a| self.areas.get(&a)) {
            Some(area) => area.options(),
            None => crate::OPTION_E,
        }
    }

    /// router and network records of one area, plus every network record
    /// we still have there from an address we no longer announce
    pub(crate) fn originate_area(&mut self, area_id: net::Ipv4Addr) {
        let Some(area) = self.areas.get(&area_id) else {
            return;
        };
        let mut keys: BTreeSet<LsaKey> = area
            .interfaces
            .values()
            .map(|i| LsaKey {
                ls_type: lsa::NETWORK_LSA_TYPE,
                ls_id: i.addr,
                adv_rtr: self.router_id,
            })
            .collect();
        keys.extend(
            area.lsdb
                .keys()
                .into_iter()
                .filter(|k| k.ls_type == lsa::NETWORK_LSA_TYPE && k.adv_rtr == self.router_id),
        );
        self.originate(Some(area_id), router_key(self.router_id), false);
        for key in keys {
            self.originate(Some(area_id), key, false);
        }
    }

    /// # originate
    /// bring our instance of `key` in line with what we want: a new instance when
    /// the content changed, a flush when it is no longer wanted.
    /// - force : a new instance even with unchanged content, for refreshes and for
    ///   a newer copy of our own record coming back from the network
    pub(crate) fn originate(&mut self, scope: Option<net::Ipv4Addr>, key: LsaKey, force: bool) {
        let body = self.desired(scope, &key);
        let options = self.options(scope);
        let tx = self.tx.clone();
        let Some(db) = self.lsdb_mut(scope) else {
            return;
        };
        let Some(body) = body else {
            match db.get(&key).map(|r| r.is_maxage()) {
                Some(false) => self.flush(scope, key),
                Some(true) => self.maybe_remove(scope, key),
                None => {}
            }
            return;
        };

        let mut seq_num = InitialSequenceNumber;
        if let Some(record) = db.get_mut(&key) {
            let maxage = record.is_maxage();
            if !force && !maxage && record.lsa.body == body && record.lsa.header.options == options
            {
                return;
            }
            if !force && !maxage && record.since_installed() < util::secs(MinLSInterval) {
                if !record.pending {
                    record.pending = true;
                    let wait = util::secs(MinLSInterval).saturating_sub(record.since_installed());
                    record.timer.arm(
                        wait,
                        &tx,
                        RdeMessage::Timer(RdeTimer::Lsa { area: scope, key }),
                    );
                    trace!(%key, "origination deferred by MinLSInterval");
                }
                return;
            }
            if record.lsa.header.seq_num == MaxSequenceNumber {
                info!(%key, "sequence number wraps, flushing the old instance first");
                record.premature_age();
                let data = record.data();
                db.remove(&key);
                self.to_engine(EngineMessage::Flood {
                    area: scope,
                    origin: 0,
                    lsa: data,
                });
            } else {
                seq_num = record.lsa.header.seq_num.wrapping_add(1);
            }
        }

        let lsa = Lsa::new(key.ls_type, key.ls_id, key.adv_rtr, seq_num, options, body);
        let data = lsa.to_be_bytes();
        let Some(db) = self.lsdb_mut(scope) else {
            return;
        };
        db.install(data.clone(), lsa);
        debug!(%key, seq_num = format_args!("{seq_num:#x}"), "record originated");
        self.to_engine(EngineMessage::Flood {
            area: scope,
            origin: 0,
            lsa: data,
        });
        self.arm_record(scope, key);
        if matches!(key.ls_type, lsa::ROUTER_LSA_TYPE | lsa::NETWORK_LSA_TYPE) {
            self.schedule_spf();
        }
    }

    /// # flush
    /// age our instance to MaxAge and flood it as a withdrawal
    pub(crate) fn flush(&mut self, scope: Option<net::Ipv4Addr>, key: LsaKey) {
        let Some(record) = self.lsdb_mut(scope).and_then(|db| db.get_mut(&key)) else {
            return;
        };
        record.premature_age();
        record.pending = false;
        record.timer.cancel();
        let data = record.data();
        info!(%key, "flushing record");
        self.to_engine(EngineMessage::Flood {
            area: scope,
            origin: 0,
            lsa: data,
        });
        self.maybe_remove(scope, key);
        if matches!(key.ls_type, lsa::ROUTER_LSA_TYPE | lsa::NETWORK_LSA_TYPE) {
            self.schedule_spf();
        }
    }

    /// drop a MaxAge record, unless a neighbor of the scope is still exchanging
    pub(crate) fn maybe_remove(&mut self, scope: Option<net::Ipv4Addr>, key: LsaKey) {
        let exchanging = self.exchanging(scope);
        let tx = self.tx.clone();
        let Some(db) = self.lsdb_mut(scope) else {
            return;
        };
        if exchanging {
            if let Some(record) = db.get_mut(&key) {
                record
                    .timer
                    .arm(MAXAGE_RECHECK, &tx, RdeMessage::Timer(RdeTimer::Lsa { area: scope, key }));
            }
            return;
        }
        if db.remove(&key).is_some() {
            debug!(%key, "MaxAge record removed");
        }
    }

    /// arm the record timer for its next deadline: our refresh, or MaxAge
    pub(crate) fn arm_record(&mut self, scope: Option<net::Ipv4Addr>, key: LsaKey) {
        let own = key.adv_rtr == self.router_id;
        let tx = self.tx.clone();
        let Some(record) = self.lsdb_mut(scope).and_then(|db| db.get_mut(&key)) else {
            return;
        };
        let age = record.age();
        let wait = if age >= MaxAge {
            MAXAGE_RECHECK
        } else if own && age < LSRefreshTime {
            util::secs(LSRefreshTime - age)
        } else {
            util::secs(MaxAge - age)
        };
        record
            .timer
            .arm(wait, &tx, RdeMessage::Timer(RdeTimer::Lsa { area: scope, key }));
    }

    /// # record_timer
    /// deferred origination, refresh, or expiry of one record
    pub(crate) fn record_timer(&mut self, scope: Option<net::Ipv4Addr>, key: LsaKey) {
        let own = key.adv_rtr == self.router_id;
        let Some(record) = self.lsdb_mut(scope).and_then(|db| db.get_mut(&key)) else {
            return;
        };
        if !record.timer.expired() {
            return;
        }
        if record.pending {
            record.pending = false;
            self.originate(scope, key, false);
            return;
        }
        if record.is_maxage() {
            if !record.flushed {
                record.flushed = true;
                let data = record.data();
                info!(%key, "record reached MaxAge");
                self.to_engine(EngineMessage::Flood {
                    area: scope,
                    origin: 0,
                    lsa: data,
                });
                self.schedule_spf();
            }
            self.maybe_remove(scope, key);
            return;
        }
        if own && record.age() >= LSRefreshTime {
            if self.desired(scope, &key).is_some() {
                trace!(%key, "refreshing record");
                self.originate(scope, key, true);
            } else {
                self.flush(scope, key);
            }
            return;
        }
        self.arm_record(scope, key);
    }

    /// # update_summaries
    /// the summary records a border router announces into each area, derived
    /// from the routing table just computed
    pub(crate) fn update_summaries(&mut self) {
        let border = self.is_border();
        let mut wanted: BTreeMap<net::Ipv4Addr, BTreeMap<LsaKey, Body>> = BTreeMap::new();
        for area in self.areas.values() {
            let mut summaries = BTreeMap::new();
            if border {
                for route in self.rtable.iter() {
                    if route.area == area.id
                        || route.path_type > PathType::InterArea
                        || route.cost >= LSInfinity
                    {
                        continue;
                    }
                    // inter-area routes are only passed from the backbone outwards
                    if route.path_type == PathType::InterArea && area.is_backbone() {
                        continue;
                    }
                    let (ls_type, mask) = match route.key.dest_type {
                        DestinationType::Network => {
                            (lsa::SUMMARY_NETWORK_LSA_TYPE, route.key.mask())
                        }
                        DestinationType::Router => {
                            if area.stub || !self.is_route_to_asbr(route) {
                                continue;
                            }
                            (lsa::SUMMARY_ROUTER_LSA_TYPE, net::Ipv4Addr::UNSPECIFIED)
                        }
                    };
                    let key = LsaKey {
                        ls_type,
                        ls_id: route.key.prefix,
                        adv_rtr: self.router_id,
                    };
                    summaries.entry(key).or_insert(Body::Summary(SummaryLsa {
                        mask,
                        metric: route.cost,
                    }));
                }
                if area.stub {
                    let key = LsaKey {
                        ls_type: lsa::SUMMARY_NETWORK_LSA_TYPE,
                        ls_id: net::Ipv4Addr::UNSPECIFIED,
                        adv_rtr: self.router_id,
                    };
                    summaries.insert(
                        key,
                        Body::Summary(SummaryLsa {
                            mask: net::Ipv4Addr::UNSPECIFIED,
                            metric: area.stub_default_cost,
                        }),
                    );
                }
            }
            wanted.insert(area.id, summaries);
        }

        for (area_id, summaries) in wanted {
            let Some(area) = self.areas.get_mut(&area_id) else {
                continue;
            };
            let mut keys: BTreeSet<LsaKey> = area.summaries.keys().copied().collect();
            keys.extend(summaries.keys().copied());
            keys.extend(area.lsdb.keys().into_iter().filter(|k| {
                k.adv_rtr == self.router_id
                    && matches!(
                        k.ls_type,
                        lsa::SUMMARY_NETWORK_LSA_TYPE | lsa::SUMMARY_ROUTER_LSA_TYPE
                    )
            }));
            area.summaries = summaries;
            for key in keys {
                self.originate(Some(area_id), key, false);
            }
        }
    }

    fn is_route_to_asbr(&self, route: &Route) -> bool {
        match route.path_type {
            PathType::IntraArea => self
                .areas
                .get(&route.area)
                .and_then(|a| a.lsdb.get(&router_key(route.key.prefix)))
                .and_then(|r| r.lsa.as_router())
                .is_some_and(|r| r.is_asbr()),
            _ => true,
        }
    }

    /// # redistribute
    /// rebuild the external records from the kernel routes and the rules.
    /// the first matching rule decides, a negated one suppresses the route.
    pub(crate) fn redistribute(&mut self) {
        let mut wanted = BTreeMap::new();
        for kroute in self.kroutes.values() {
            let Some(rule) = self
                .config
                .redistribute
                .iter()
                .find(|rule| rule_matches(rule, kroute))
            else {
                continue;
            };
            if rule.no {
                continue;
            }
            // subnets of our own interfaces are announced by the router records
            if kroute.origin == RouteOrigin::Connected
                && self
                    .areas
                    .values()
                    .flat_map(|a| a.interfaces.values())
                    .any(|i| kroute.prefix.contains(&i.addr))
            {
                continue;
            }
            let key = LsaKey {
                ls_type: lsa::AS_EXTERNAL_LSA_TYPE,
                ls_id: kroute.prefix.network(),
                adv_rtr: self.router_id,
            };
            wanted.entry(key).or_insert(Body::External(ExternalLsa {
                mask: kroute.prefix.netmask(),
                type2: rule.type2,
                metric: rule.metric.min(LSInfinity - 1),
                forwarding: net::Ipv4Addr::UNSPECIFIED,
                tag: rule.tag,
            }));
        }

        let was_asbr = self.is_asbr();
        let mut keys: BTreeSet<LsaKey> = self.external_wanted.keys().copied().collect();
        keys.extend(wanted.keys().copied());
        keys.extend(
            self.externals
                .keys()
                .into_iter()
                .filter(|k| k.adv_rtr == self.router_id),
        );
        self.external_wanted = wanted;
        for key in keys {
            self.originate(None, key, false);
        }
        if was_asbr != self.is_asbr() {
            info!(asbr = self.is_asbr(), "boundary router status changed");
            let ids: Vec<net::Ipv4Addr> = self.areas.keys().copied().collect();
            for id in ids {
                self.originate(Some(id), router_key(self.router_id), false);
            }
        }
    }
}

fn rule_matches(rule: &RedistributeRule, kroute: &Kroute) -> bool {
    match &rule.what {
        RedistributeKind::Static => kroute.origin == RouteOrigin::Static,
        RedistributeKind::Connected => kroute.origin == RouteOrigin::Connected,
        RedistributeKind::Default => kroute.prefix.prefix_len() == 0,
        RedistributeKind::Prefix(net) => net.contains(&kroute.prefix),
    }
}
