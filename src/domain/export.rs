use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use serde::Deserialize;

use super::errors::DomainError;
use super::order::Order;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

/// Inclusive creation-time bounds; an absent end is open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreatedWindow {
    pub from: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl CreatedWindow {
    /// Accepts RFC 3339 timestamps or bare `YYYY-MM-DD` dates. A bare end date
    /// covers that whole day.
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self, DomainError> {
        let from = start.map(|s| parse_bound(s, NaiveTime::MIN)).transpose()?;
        let until = end
            .map(|s| parse_bound(s, last_instant_of_day()))
            .transpose()?;
        if let (Some(from), Some(until)) = (from, until) {
            if from > until {
                return Err(DomainError::InvalidArgument(
                    "start_date must not be after end_date".into(),
                ));
            }
        }
        Ok(Self { from, until })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| at >= from) && self.until.map_or(true, |until| at <= until)
    }
}

fn last_instant_of_day() -> NaiveTime {
    NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999).unwrap_or(NaiveTime::MIN)
}

fn parse_bound(raw: &str, time_of_day: NaiveTime) -> Result<DateTime<Utc>, DomainError> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|day| day.and_time(time_of_day).and_utc())
        .map_err(|_| DomainError::InvalidArgument(format!("unrecognised date {raw:?}")))
}

pub const CSV_HEADER: &str = "Order ID,Date,User,Total,Status,Payment Status";

/// One line per order under [`CSV_HEADER`]; guest orders show `Guest` as the user.
pub fn orders_csv(orders: &[Order]) -> String {
    let mut lines = Vec::with_capacity(orders.len() + 1);
    lines.push(CSV_HEADER.to_string());
    for order in orders {
        let user = order
            .user_id
            .map_or_else(|| "Guest".to_string(), |id| id.to_string());
        let row = [
            order.id.to_string(),
            order.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            user,
            order.total.to_string(),
            order.status.to_string(),
            order.payment_status.to_string(),
        ];
        lines.push(
            row.iter()
                .map(|field| escape_field(field))
                .collect::<Vec<_>>()
                .join(","),
        );
    }
    lines.join("\n")
}

fn escape_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use bigdecimal::{BigDecimal, Zero};
    use chrono::TimeZone;
    use uuid::Uuid;

    use super::*;
    use crate::domain::order::{LineItem, OrderTotals};

    fn order(user_id: Option<Uuid>) -> Order {
        let items = vec![LineItem {
            product_id: Uuid::new_v4(),
            name: "Lamp".into(),
            unit_price: BigDecimal::from(500),
            quantity: 1,
        }];
        let totals = OrderTotals::compute(&items, &BigDecimal::zero(), &BigDecimal::zero());
        let placed = Utc.with_ymd_and_hms(2024, 3, 9, 14, 30, 0).unwrap();
        Order::place(user_id, items, totals, placed)
    }

    #[test]
    fn csv_has_header_and_marks_guests() {
        let user = Uuid::new_v4();
        let signed_in = order(Some(user));
        let guest = order(None);

        let csv = orders_csv(&[signed_in.clone(), guest.clone()]);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(
            lines[1],
            format!(
                "{},2024-03-09T14:30:00Z,{user},{},pending,pending",
                signed_in.id, signed_in.total
            )
        );
        assert!(lines[2].contains(",Guest,"));
        assert_eq!(orders_csv(&[]), CSV_HEADER);
    }

    #[test]
    fn fields_with_separators_are_quoted() {
        assert_eq!(escape_field("plain"), "plain");
        assert_eq!(escape_field("a,b"), "\"a,b\"");
        assert_eq!(escape_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn window_accepts_dates_and_timestamps() {
        let window = CreatedWindow::parse(Some("2024-03-01"), Some("2024-03-09")).unwrap();
        assert!(window.contains(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()));
        assert!(window.contains(Utc.with_ymd_and_hms(2024, 3, 9, 23, 0, 0).unwrap()));
        assert!(!window.contains(Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap()));

        let open = CreatedWindow::parse(Some("2024-03-09T12:00:00+02:00"), None).unwrap();
        assert_eq!(open.from, Some(Utc.with_ymd_and_hms(2024, 3, 9, 10, 0, 0).unwrap()));
        assert!(open.contains(Utc::now()));
    }

    #[test]
    fn window_rejects_garbage_and_reversed_bounds() {
        assert!(matches!(
            CreatedWindow::parse(Some("last tuesday"), None),
            Err(DomainError::InvalidArgument(_))
        ));
        assert!(matches!(
            CreatedWindow::parse(Some("2024-03-09"), Some("2024-03-01")),
            Err(DomainError::InvalidArgument(_))
        ));
    }
}
