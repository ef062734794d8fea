use crate::domain::{Goods, Page, PageRequest};
use crate::planes::read::point::load_failure;
use crate::planes::service::EntityService;
use shared::{Error, Result};
use std::cmp::Ordering;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Column a goods listing can be ordered by.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GoodsSortKey {
    Id,
    Name,
    Stock,
    Price,
}

impl FromStr for GoodsSortKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "id" => Ok(GoodsSortKey::Id),
            "name" => Ok(GoodsSortKey::Name),
            "stock" => Ok(GoodsSortKey::Stock),
            "price" => Ok(GoodsSortKey::Price),
            other => Err(Error::InvalidSort(format!("unknown column '{}'", other))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SortSpec {
    pub key: GoodsSortKey,
    pub direction: Direction,
}

impl SortSpec {
    pub fn asc(key: GoodsSortKey) -> Self {
        Self {
            key,
            direction: Direction::Asc,
        }
    }

    pub fn desc(key: GoodsSortKey) -> Self {
        Self {
            key,
            direction: Direction::Desc,
        }
    }

    fn compare(&self, a: &Goods, b: &Goods) -> Ordering {
        let ordering = match self.key {
            GoodsSortKey::Id => a.id.cmp(&b.id),
            GoodsSortKey::Name => a.name.cmp(&b.name),
            GoodsSortKey::Stock => a.stock.cmp(&b.stock),
            GoodsSortKey::Price => a.price_cents.cmp(&b.price_cents),
        };
        match self.direction {
            Direction::Asc => ordering,
            Direction::Desc => ordering.reverse(),
        }
    }
}

/// Parses `column` or `column,asc|desc`; the direction defaults to ascending.
impl FromStr for SortSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(2, ',');
        let key = parts.next().unwrap_or_default().parse::<GoodsSortKey>()?;
        let direction = match parts.next().map(|d| d.trim().to_ascii_lowercase()) {
            None => Direction::Asc,
            Some(d) if d == "asc" => Direction::Asc,
            Some(d) if d == "desc" => Direction::Desc,
            Some(d) => {
                return Err(Error::InvalidSort(format!("unknown direction '{}'", d)));
            }
        };
        Ok(Self { key, direction })
    }
}

/// Lexicographic ordering over several columns; newest first when empty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GoodsOrdering {
    specs: Vec<SortSpec>,
}

impl GoodsOrdering {
    pub fn new(specs: Vec<SortSpec>) -> Self {
        if specs.is_empty() {
            return Self::default();
        }
        Self { specs }
    }

    pub fn parse<'a>(specs: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let specs = specs
            .into_iter()
            .map(str::parse::<SortSpec>)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(specs))
    }

    pub fn specs(&self) -> &[SortSpec] {
        &self.specs
    }

    pub fn compare(&self, a: &Goods, b: &Goods) -> Ordering {
        self.specs
            .iter()
            .map(|spec| spec.compare(a, b))
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    }

    pub fn sort(&self, goods: &mut [Goods]) {
        goods.sort_by(|a, b| self.compare(a, b));
    }
}

impl Default for GoodsOrdering {
    fn default() -> Self {
        Self {
            specs: vec![SortSpec::desc(GoodsSortKey::Id)],
        }
    }
}

/// Filtered, sorted paging over a store's goods.
///
/// Serves from the store's list index while it is known to hold every item
/// (fewer than `window` members); larger stores are read from the store.
#[derive(Debug, Clone)]
pub struct GoodsCatalog {
    goods: Arc<EntityService<Goods>>,
}

impl GoodsCatalog {
    pub fn new(goods: Arc<EntityService<Goods>>) -> Self {
        Self { goods }
    }

    pub async fn page_by_store(
        &self,
        store_id: i64,
        request: PageRequest,
        name_filter: Option<&str>,
        ordering: &GoodsOrdering,
    ) -> Result<Page<Goods>> {
        let members = self.store_goods(store_id).await?;
        if members.is_empty() {
            return Ok(Page::empty(request));
        }

        let needle = name_filter.map(str::trim).filter(|n| !n.is_empty());
        let mut filtered: Vec<Goods> = members
            .into_iter()
            .filter(|goods| needle.is_none_or(|n| goods.name.contains(n)))
            .collect();
        ordering.sort(&mut filtered);

        let total = filtered.len();
        let records = filtered
            .into_iter()
            .skip(request.offset)
            .take(request.limit)
            .collect();
        Ok(Page {
            records,
            total,
            offset: request.offset,
            limit: request.limit,
        })
    }

    async fn store_goods(&self, store_id: i64) -> Result<Vec<Goods>> {
        let lists = self.goods.lists();
        let ids = lists.member_ids(store_id).await?;
        if ids.len() < lists.window() {
            return lists
                .fetch_members(&ids, |id| self.goods.points().get_known(id))
                .await;
        }

        debug!(
            "Store {} has at least {} goods, reading catalog from store",
            store_id,
            lists.window()
        );
        self.goods
            .store()
            .find_page_by_parent(store_id, 0, usize::MAX)
            .await
            .map_err(load_failure)
    }
}
