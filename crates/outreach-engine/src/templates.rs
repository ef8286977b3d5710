//! Message templates as lookup tables.
//!
//! Campaign copy is keyed by month number or reminder type; adding a
//! campaign variant means adding a row, not a branch. Placeholders are
//! `{name}` and are filled from cohort fields.

use std::collections::BTreeMap;

/// Subject + body with `{placeholder}`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Template {
    pub subject: &'static str,
    pub body: &'static str,
}

const fn t(subject: &'static str, body: &'static str) -> Template {
    Template { subject, body }
}

/// Seasonal promotion per month (index 0 = January).
const SEASONAL: [Template; 12] = [
    t(
        "New year, fresh start",
        "Hi {name}, start the year right: book a deep clean this month and get 15% off.",
    ),
    t(
        "Beat the winter blues",
        "Hi {name}, February is a great time for indoor projects. Handyman visits are 10% off this month.",
    ),
    t(
        "Spring is coming",
        "Hi {name}, get ahead of spring with gutter cleaning and a roof check. Book now for March.",
    ),
    t(
        "Spring cleaning season",
        "Hi {name}, it's spring cleaning season! Window washing and pressure washing are 15% off in April.",
    ),
    t(
        "Get your yard ready",
        "Hi {name}, lawn and garden pros are booking up for May. Reserve your spot today.",
    ),
    t(
        "Summer-ready home",
        "Hi {name}, get your AC serviced before the heat arrives. HVAC tune-ups are 10% off in June.",
    ),
    t(
        "Beat the heat",
        "Hi {name}, keep cool this July: book an HVAC check or ceiling fan install with a top-rated pro.",
    ),
    t(
        "Back-to-school reset",
        "Hi {name}, reset the house before school starts. Junk removal and organizing are 10% off in August.",
    ),
    t(
        "Fall prep time",
        "Hi {name}, fall is here. Schedule gutter cleaning and a furnace check before the weather turns.",
    ),
    t(
        "Cozy season checklist",
        "Hi {name}, October is the time for chimney sweeps, dryer vent cleaning and weatherstripping.",
    ),
    t(
        "Get ready for guests",
        "Hi {name}, hosting this season? Book a deep clean before the holidays and save 15%.",
    ),
    t(
        "Holiday help",
        "Hi {name}, let a pro handle holiday lights and post-party cleanup this December.",
    ),
];

/// Maintenance reminder copy per reminder type.
const MAINTENANCE: &[(&str, Template)] = &[
    (
        "gutter_cleaning",
        t(
            "Gutter cleaning due soon",
            "Hi {name}, your gutter cleaning is due around {due_date}. Clogged gutters can damage your roof; book a pro in two taps.",
        ),
    ),
    (
        "hvac_filter",
        t(
            "Time to change your HVAC filter",
            "Hi {name}, your HVAC filter change is due around {due_date}. A fresh filter keeps the air clean and the bills down.",
        ),
    ),
    (
        "dryer_vent",
        t(
            "Dryer vent cleaning due",
            "Hi {name}, your dryer vent cleaning is due around {due_date}. Lint buildup is a leading cause of house fires.",
        ),
    ),
    (
        "pressure_washing",
        t(
            "Pressure washing reminder",
            "Hi {name}, it's almost time ({due_date}) to pressure wash your driveway and siding. Want us to find a pro?",
        ),
    ),
    (
        "window_cleaning",
        t(
            "Window cleaning reminder",
            "Hi {name}, your window cleaning is due around {due_date}. Reply or open the app to book.",
        ),
    ),
];

const MAINTENANCE_DEFAULT: Template = t(
    "Home maintenance reminder",
    "Hi {name}, you have home maintenance coming up around {due_date}. Book a pro before it slips.",
);

/// Smart-home alert types that bypass the delivery gate.
pub const EMERGENCY_ALERT_TYPES: &[&str] = &["water_leak", "smoke", "carbon_monoxide", "gas_leak"];

const SMART_HOME: &[(&str, Template)] = &[
    (
        "water_leak",
        t(
            "Water leak detected",
            "URGENT {name}: your {device} detected an active water leak. Shut off the main water valve if you can. Reply HELP for an emergency plumber.",
        ),
    ),
    (
        "smoke",
        t(
            "Smoke detected",
            "URGENT {name}: your {device} detected smoke. If you are home, get out and call 911.",
        ),
    ),
    (
        "carbon_monoxide",
        t(
            "Carbon monoxide detected",
            "URGENT {name}: your {device} detected carbon monoxide. Leave the house and call 911.",
        ),
    ),
    (
        "gas_leak",
        t(
            "Gas leak detected",
            "URGENT {name}: your {device} detected a possible gas leak. Leave now and call your gas utility from outside.",
        ),
    ),
    (
        "low_battery",
        t(
            "Device battery low",
            "Hi {name}, the battery in your {device} is running low. Swap it soon to stay protected.",
        ),
    ),
    (
        "freeze_warning",
        t(
            "Freeze risk at home",
            "Hi {name}, your {device} reports temperatures near freezing. Drip your faucets to protect your pipes.",
        ),
    ),
];

const SMART_HOME_DEFAULT: Template = t(
    "Smart-home alert",
    "Hi {name}, your {device} reported: {alert_type}. Open the app for details.",
);

pub const BOOKING_CONFIRMED: Template = t(
    "Your booking is confirmed",
    "Hi {name}, your {service} is confirmed for {when}. We'll text you when your pro is on the way.",
);

pub const PRO_EN_ROUTE: Template = t(
    "Your pro is on the way",
    "Hi {name}, {pro_name} is on the way for your {service} ({eta}).",
);

pub const JOB_FOLLOW_UP: Template = t(
    "How did we do?",
    "Hi {name}, how did your {service} go? Reply 1-5 to rate it, or tell us if anything needs fixing.",
);

pub const REFERRAL_REFERRER: Template = t(
    "You earned a referral credit",
    "Hi {name}, {friend} just completed their first booking. We added ${amount} to your account. Thanks for spreading the word!",
);

pub const REFERRAL_REFEREE: Template = t(
    "Welcome bonus unlocked",
    "Hi {name}, thanks for booking with us! ${amount} in credit is now on your account for next time.",
);

pub const LOYALTY_TIER: Template = t(
    "You reached {tier}!",
    "Congrats {name}! You've reached {tier} status. You now get {perk}.",
);

pub const FEE_TIER: Template = t(
    "New fee tier: {tier}",
    "Congrats {name}! With {value} certifications you're now {tier}, which means {perk} on every job.",
);

pub const WEATHER_HEADSUP: Template = t(
    "Weather alert: {event}",
    "Hi {name}, heads up: {headline}. If your home needs help before or after, our pros are standing by.",
);

pub const WIN_BACK: Template = t(
    "We miss you",
    "Hi {name}, it's been a while since your last {last_service}. Book again this week and get $20 off.",
);

pub const HOME_HEALTH_NUDGE: Template = t(
    "Get your free home health score",
    "Hi {name}, a 2-minute home health scan shows what needs attention before it gets expensive. Try it in the app.",
);

pub const EMERGENCY_PRO: Template = t(
    "EMERGENCY JOB",
    "EMERGENCY JOB: customer {customer} reports \"{excerpt}\"{location}. ETA {eta_minutes} min. Reply YES to confirm.",
);

pub const EMERGENCY_CUSTOMER: Template = t(
    "Help is on the way",
    "Hi {name}, {pro_name} is on the way for your emergency. Estimated arrival: {eta_minutes} min.",
);

pub const EMERGENCY_HOLDING: Template = t(
    "We're on it",
    "Hi {name}, we got your emergency message. All our pros are busy right now, so a team member will call you shortly to arrange help.",
);

pub fn seasonal(month: u32) -> Template {
    let index = month.clamp(1, 12) as usize - 1;
    SEASONAL[index]
}

pub fn maintenance(reminder_type: &str) -> Template {
    lookup(MAINTENANCE, reminder_type).unwrap_or(MAINTENANCE_DEFAULT)
}

pub fn smart_home(alert_type: &str) -> Template {
    lookup(SMART_HOME, alert_type).unwrap_or(SMART_HOME_DEFAULT)
}

pub fn is_emergency_alert(alert_type: &str) -> bool {
    EMERGENCY_ALERT_TYPES.contains(&alert_type)
}

fn lookup(table: &[(&str, Template)], key: &str) -> Option<Template> {
    table.iter().find(|(k, _)| *k == key).map(|(_, t)| *t)
}

/// Fill `{key}` placeholders. Unknown placeholders are left as-is.
pub fn render(text: &str, fields: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match fields.get(key) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Placeholder fields builder.
#[derive(Debug, Default, Clone)]
pub struct Fields(BTreeMap<String, String>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }

    pub fn from_map(map: &BTreeMap<String, String>) -> Self {
        Self(map.clone())
    }

    pub fn render(&self, template: Template) -> (String, String) {
        (render(template.subject, &self.0), render(template.body, &self.0))
    }
}

/// Cut to at most `max` characters on a char boundary, with an ellipsis.
pub fn excerpt(text: &str, max: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}
